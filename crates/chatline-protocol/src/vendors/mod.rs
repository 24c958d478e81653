//! Generator implementations.

pub mod echo;
pub mod openai;

pub use echo::EchoGenerator;
