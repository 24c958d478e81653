use chatline_protocol::prelude::*;
use chatline_protocol::vendors::EchoGenerator;

/// Prints the raw wire transcript of an echo reply, then decodes it back.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EncodeError> {
    let prompt = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let prompt = if prompt.trim().is_empty() {
        "hello from the data stream".to_string()
    } else {
        prompt
    };

    let request = ChatRequest::new(vec![ChatMessage::new("1", Role::User, prompt)]);
    let mut encoder = StreamEncoder::new(Vec::new());
    respond(&EchoGenerator::new().with_reasoning(), &request, &mut encoder).await?;
    let transcript = encoder.into_sink();
    print!("{}", String::from_utf8_lossy(&transcript));

    let mut decoder = StreamDecoder::new();
    decoder.push_chunk_with(&transcript, |update, session| {
        println!("{update:?} -> {:?}", session.status());
    });
    match decoder.close() {
        Ok(finish) => println!("finished: {}", finish.finish_reason),
        Err(failure) => println!("failed: {failure}"),
    }
    Ok(())
}
