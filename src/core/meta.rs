use std::collections::HashMap;

use crate::core::types::TrackInfo;

/// 元数据键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    MimeType,
    Width,
    Height,
    SampleRate,
    ChannelCount,
    BitRate,
    DurationUs,
    /// 编解码器配置头（SPS+PPS 或 AudioSpecificConfig）
    CodecHeader,
    /// 单个输入缓冲区的建议上限
    MaxInputSize,
}

/// 元数据值
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    I32(i32),
    I64(i64),
    Data(Vec<u8>),
}

/// 轨道格式：类型化的键值表
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    entries: HashMap<MetaKey, MetaValue>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_str(&mut self, key: MetaKey, value: &str) {
        self.entries.insert(key, MetaValue::Str(value.to_string()));
    }

    pub fn set_i32(&mut self, key: MetaKey, value: i32) {
        self.entries.insert(key, MetaValue::I32(value));
    }

    pub fn set_i64(&mut self, key: MetaKey, value: i64) {
        self.entries.insert(key, MetaValue::I64(value));
    }

    pub fn set_data(&mut self, key: MetaKey, value: Vec<u8>) {
        self.entries.insert(key, MetaValue::Data(value));
    }

    pub fn find_str(&self, key: MetaKey) -> Option<&str> {
        match self.entries.get(&key) {
            Some(MetaValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn find_i32(&self, key: MetaKey) -> Option<i32> {
        match self.entries.get(&key) {
            Some(MetaValue::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn find_i64(&self, key: MetaKey) -> Option<i64> {
        match self.entries.get(&key) {
            Some(MetaValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn find_data(&self, key: MetaKey) -> Option<&[u8]> {
        match self.entries.get(&key) {
            Some(MetaValue::Data(d)) => Some(d.as_slice()),
            _ => None,
        }
    }

    pub fn contains(&self, key: MetaKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn remove(&mut self, key: MetaKey) -> Option<MetaValue> {
        self.entries.remove(&key)
    }

    /// 生成可序列化的摘要
    pub fn to_track_info(&self) -> TrackInfo {
        TrackInfo {
            mime: self.find_str(MetaKey::MimeType).unwrap_or("").to_string(),
            width: self.find_i32(MetaKey::Width).unwrap_or(0).max(0) as u32,
            height: self.find_i32(MetaKey::Height).unwrap_or(0).max(0) as u32,
            sample_rate: self.find_i32(MetaKey::SampleRate).unwrap_or(0).max(0) as u32,
            channels: self.find_i32(MetaKey::ChannelCount).unwrap_or(0).max(0) as u16,
            bit_rate: self.find_i32(MetaKey::BitRate).unwrap_or(0).max(0) as u32,
            duration_us: self.find_i64(MetaKey::DurationUs).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mime;

    #[test]
    fn test_set_and_find() {
        let mut meta = MetaData::new();
        meta.set_str(MetaKey::MimeType, mime::VIDEO_AVC);
        meta.set_i32(MetaKey::Width, 1280);
        meta.set_i64(MetaKey::DurationUs, 90_000_000);
        meta.set_data(MetaKey::CodecHeader, vec![0x67, 0x68]);

        assert_eq!(meta.find_str(MetaKey::MimeType), Some(mime::VIDEO_AVC));
        assert_eq!(meta.find_i32(MetaKey::Width), Some(1280));
        assert_eq!(meta.find_i64(MetaKey::DurationUs), Some(90_000_000));
        assert_eq!(meta.find_data(MetaKey::CodecHeader), Some(&[0x67, 0x68][..]));
        assert_eq!(meta.find_i32(MetaKey::Height), None);
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let mut meta = MetaData::new();
        meta.set_i32(MetaKey::Width, 640);
        assert_eq!(meta.find_str(MetaKey::Width), None);
        assert_eq!(meta.find_i64(MetaKey::Width), None);
    }

    #[test]
    fn test_to_track_info() {
        let mut meta = MetaData::new();
        meta.set_str(MetaKey::MimeType, mime::AUDIO_AAC);
        meta.set_i32(MetaKey::SampleRate, 48000);
        meta.set_i32(MetaKey::ChannelCount, 2);

        let info = meta.to_track_info();
        assert_eq!(info.mime, mime::AUDIO_AAC);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.width, 0);
    }
}
