//! 领域层
//!
//! 消息、扩展清单、扩展能力接口和生成引擎接口

pub mod extension;
pub mod generation;
pub mod manifest;
pub mod message;

pub use extension::{Extension, ExtensionOutput, ExtensionReply, ExtensionState, Params};
pub use generation::{truncate_at_stop, BoxedStream, Generation, GenerationRequest, Generator};
pub use manifest::Manifest;
pub use message::{Message, MessageId, Metadata, Role};
