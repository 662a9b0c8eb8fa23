pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use request::CreateChatCompletionRequestBody;
pub use response::CreateChatCompletionResponse;
pub use stream::CreateChatCompletionStreamResponse;
