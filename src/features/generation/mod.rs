//! 图片生成/编辑接口：校验提示词与上传文件后调用 Google 生成式 API。

pub mod client;
pub mod handler;
pub mod models;

pub use client::{GoogleAiClient, GoogleAiError};
pub use handler::create_generation_router;
pub use models::{Model, PromptRequest};
