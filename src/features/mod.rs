/// 图片生成/编辑接口
pub mod generation;

/// 健康检查
pub mod health;

/// 上传图片规范化
pub mod normalize;
