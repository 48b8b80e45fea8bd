// MIME 类型常量

pub const CONTAINER_AVI: &str = "video/avi";
pub const CONTAINER_ASF: &str = "video/x-ms-asf";

pub const VIDEO_AVC: &str = "video/avc";
pub const AUDIO_AAC: &str = "audio/mp4a-latm";
