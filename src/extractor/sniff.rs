use crate::core::error::Result;
use crate::core::mime;

/// 按偏移读取的数据源
pub trait DataSource {
    /// 从 `offset` 处读入 `buf`，返回实际读到的字节数
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl DataSource for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - offset);
        buf[..n].copy_from_slice(&self[offset..offset + n]);
        Ok(n)
    }
}

/// ASF 容器头部 GUID
const ASF_HEADER_GUID: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE,
    0x6C,
];

/// 嗅探容器类型：读取头部 16 字节识别 AVI / ASF。
/// 识别成功返回 (mime, 置信度)。
pub fn sniff<S: DataSource + ?Sized>(source: &S) -> Result<Option<(&'static str, f32)>> {
    let mut header = [0u8; 16];
    let n = source.read_at(0, &mut header)?;
    if n < 16 {
        return Ok(None);
    }

    if &header[0..4] == b"RIFF" && (&header[8..12] == b"AVI " || &header[8..12] == b"AVIX") {
        return Ok(Some((mime::CONTAINER_AVI, 1.0)));
    }
    if header == ASF_HEADER_GUID {
        return Ok(Some((mime::CONTAINER_ASF, 1.0)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_avi() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&1234u32.to_le_bytes());
        data.extend_from_slice(b"AVI ");
        data.extend_from_slice(&[0u8; 8]);
        let result = sniff(&data[..]).unwrap();
        assert_eq!(result, Some((mime::CONTAINER_AVI, 1.0)));
    }

    #[test]
    fn test_sniff_avix_extended() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"AVIX");
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(sniff(&data[..]).unwrap(), Some((mime::CONTAINER_AVI, 1.0)));
    }

    #[test]
    fn test_sniff_asf() {
        let mut data = ASF_HEADER_GUID.to_vec();
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff(&data[..]).unwrap(), Some((mime::CONTAINER_ASF, 1.0)));
    }

    #[test]
    fn test_sniff_unknown_and_short() {
        assert_eq!(sniff(&b"MPEG-TS data...."[..]).unwrap(), None);
        // 不足 16 字节无法判定
        assert_eq!(sniff(&b"RIFF"[..]).unwrap(), None);
    }
}
