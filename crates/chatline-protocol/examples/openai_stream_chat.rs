use chatline_protocol::prelude::*;
use chatline_protocol::vendors::openai::OpenAiGenerator;
use chatline_protocol::{ChannelSink, consume};
use tokio_stream::wrappers::ReceiverStream;
use futures::StreamExt as _;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let generator = OpenAiGenerator::from_env()?;
    let request = ChatRequest::new(vec![ChatMessage::new(
        "1",
        Role::User,
        "Stream a short greeting.",
    )]);

    // Encoder and decoder meet over an in-process channel.
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let body = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    let mut session = consume(body);

    let writer = tokio::spawn(async move {
        let mut encoder = StreamEncoder::new(ChannelSink::new(tx));
        respond(&generator, &request, &mut encoder).await
    });

    let mut printed = 0;
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::Updated { snapshot, .. } => {
                if let Some(reply) = snapshot.assistant() {
                    print!("{}", &reply.content[printed..]);
                    printed = reply.content.len();
                }
            }
            SessionEvent::Finished(_) => println!(),
            SessionEvent::Failed { failure, .. } => eprintln!("session error: {failure}"),
        }
    }

    writer.await??;
    let outcome = session.finish().await;
    if let Ok(finish) = outcome.result {
        println!("finish: {}", finish.finish_reason);
    }
    Ok(())
}
