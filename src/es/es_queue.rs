use std::collections::VecDeque;

use log::{info, warn};

use crate::core::error::{DemuxError, Result};
use crate::core::meta::{MetaData, MetaKey};
use crate::core::mime;
use crate::core::types::{AccessUnit, StreamType};

/// AAC 采样率索引表
const AAC_SAMPLE_RATES: [i32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// 按编解码器把字节流重组为访问单元。
///
/// append 的每段字节带一个时间戳，通过区间表映射到产出的访问单元上
/// （单元继承其首字节所在区间的时间戳）。
pub struct ElementaryStreamQueue {
    mode: StreamType,
    buffer: Vec<u8>,
    /// (字节数, 时间戳) 区间，与 buffer 对应
    ranges: VecDeque<(usize, i64)>,
    format: Option<MetaData>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ElementaryStreamQueue {
    pub fn new(mode: StreamType) -> Self {
        Self {
            mode,
            buffer: Vec::new(),
            ranges: VecDeque::new(),
            format: None,
            sps: None,
            pps: None,
        }
    }

    pub fn append(&mut self, data: &[u8], pts_us: i64) {
        if data.is_empty() {
            return;
        }
        self.ranges.push_back((data.len(), pts_us));
        self.buffer.extend_from_slice(data);
    }

    pub fn format(&self) -> Option<MetaData> {
        self.format.clone()
    }

    /// 丢弃积压数据；格式变更时连同已发现的格式一起作废
    pub fn clear(&mut self, clear_format: bool) {
        self.buffer.clear();
        self.ranges.clear();
        if clear_format {
            self.format = None;
            self.sps = None;
            self.pps = None;
        }
    }

    pub fn dequeue_access_unit(&mut self) -> Option<AccessUnit> {
        match self.mode {
            StreamType::H264 => self.dequeue_h264(),
            StreamType::AacAdts => self.dequeue_aac(),
        }
    }

    /// 消费 `size` 字节对应的时间戳区间，返回首字节所属的时间戳
    fn fetch_timestamp(&mut self, size: usize) -> i64 {
        let mut pts: Option<i64> = None;
        let mut remaining = size;
        while remaining > 0 {
            match self.ranges.front_mut() {
                Some((len, ts)) => {
                    if pts.is_none() {
                        pts = Some(*ts);
                    }
                    if *len <= remaining {
                        remaining -= *len;
                        self.ranges.pop_front();
                    } else {
                        *len -= remaining;
                        remaining = 0;
                    }
                }
                None => break,
            }
        }
        pts.unwrap_or(0)
    }

    // ---- H.264 ----

    /// 定位 Annex-B 起始码（00 00 01 或 00 00 00 01），
    /// 返回（起始码偏移，起始码长度）
    fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
        let mut i = from;
        while i + 3 <= data.len() {
            if data[i] == 0 && data[i + 1] == 0 {
                if data[i + 2] == 1 {
                    return Some((i, 3));
                }
                if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                    return Some((i, 4));
                }
            }
            i += 1;
        }
        None
    }

    fn dequeue_h264(&mut self) -> Option<AccessUnit> {
        let (first, first_len) = Self::find_start_code(&self.buffer, 0)?;
        if first > 0 {
            // 起始码前的垃圾字节
            warn!("丢弃 {} 字节非 NAL 数据", first);
            self.buffer.drain(0..first);
            self.fetch_timestamp(first);
        }
        let (next, _) = Self::find_start_code(&self.buffer, first_len)?;

        let unit: Vec<u8> = self.buffer.drain(0..next).collect();
        let pts = self.fetch_timestamp(unit.len());

        let nal_offset = if unit.get(2) == Some(&1) { 3 } else { 4 };
        if let Some(&nal_header) = unit.get(nal_offset) {
            let nal_type = nal_header & 0x1f;
            match nal_type {
                7 => self.sps = Some(unit[nal_offset..].to_vec()),
                8 => self.pps = Some(unit[nal_offset..].to_vec()),
                _ => {}
            }
            if self.format.is_none() {
                self.try_make_h264_format();
            }
        }

        Some(AccessUnit::new(unit, pts))
    }

    fn try_make_h264_format(&mut self) {
        let (sps, pps) = match (&self.sps, &self.pps) {
            (Some(s), Some(p)) => (s.clone(), p.clone()),
            _ => return,
        };
        let (width, height) = match parse_sps_dimensions(&sps) {
            Ok(dims) => dims,
            Err(e) => {
                warn!("SPS 解析失败: {}", e);
                return;
            }
        };
        let mut meta = MetaData::new();
        meta.set_str(MetaKey::MimeType, mime::VIDEO_AVC);
        meta.set_i32(MetaKey::Width, width);
        meta.set_i32(MetaKey::Height, height);
        // 配置头：起始码 + SPS + 起始码 + PPS
        let mut csd = Vec::with_capacity(sps.len() + pps.len() + 8);
        csd.extend_from_slice(&[0, 0, 0, 1]);
        csd.extend_from_slice(&sps);
        csd.extend_from_slice(&[0, 0, 0, 1]);
        csd.extend_from_slice(&pps);
        meta.set_data(MetaKey::CodecHeader, csd);
        info!("H264 格式确定: {}x{}", width, height);
        self.format = Some(meta);
    }

    // ---- AAC (ADTS) ----

    fn dequeue_aac(&mut self) -> Option<AccessUnit> {
        loop {
            if self.buffer.len() < 7 {
                return None;
            }
            if self.buffer[0] == 0xFF && (self.buffer[1] & 0xF0) == 0xF0 {
                break;
            }
            // 同步字丢失：向后扫描重新同步
            let skip = self
                .buffer
                .windows(2)
                .skip(1)
                .position(|w| w[0] == 0xFF && (w[1] & 0xF0) == 0xF0)
                .map(|p| p + 1)
                .unwrap_or(self.buffer.len());
            warn!("ADTS 失去同步，丢弃 {} 字节", skip);
            self.buffer.drain(0..skip);
            self.fetch_timestamp(skip);
        }

        let hdr = &self.buffer[..7];
        let frame_len = (((hdr[3] & 0x03) as usize) << 11)
            | ((hdr[4] as usize) << 3)
            | ((hdr[5] as usize) >> 5);
        if frame_len < 7 {
            warn!("ADTS 帧长非法: {}，丢弃同步字重扫", frame_len);
            self.buffer.drain(0..2);
            self.fetch_timestamp(2);
            return self.dequeue_aac();
        }
        if self.buffer.len() < frame_len {
            return None;
        }

        if self.format.is_none() {
            self.make_aac_format();
        }

        let frame: Vec<u8> = self.buffer.drain(0..frame_len).collect();
        let pts = self.fetch_timestamp(frame_len);
        Some(AccessUnit::new(frame, pts))
    }

    fn make_aac_format(&mut self) {
        let hdr = &self.buffer[..7];
        let profile = (hdr[2] >> 6) & 0x03;
        let freq_index = (hdr[2] >> 2) & 0x0F;
        let channels = ((hdr[2] & 0x01) << 2) | (hdr[3] >> 6);
        let sample_rate = AAC_SAMPLE_RATES
            .get(freq_index as usize)
            .copied()
            .unwrap_or(44100);

        let mut meta = MetaData::new();
        meta.set_str(MetaKey::MimeType, mime::AUDIO_AAC);
        meta.set_i32(MetaKey::SampleRate, sample_rate);
        meta.set_i32(MetaKey::ChannelCount, channels as i32);
        // 2 字节 AudioSpecificConfig
        let object_type = profile + 1;
        let csd = vec![
            (object_type << 3) | (freq_index >> 1),
            ((freq_index & 0x01) << 7) | (channels << 3),
        ];
        meta.set_data(MetaKey::CodecHeader, csd);
        info!("AAC 格式确定: {}Hz {} 声道", sample_rate, channels);
        self.format = Some(meta);
    }
}

// ---- SPS 解析 ----

struct BitReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte: 0,
            bit: 0,
        }
    }

    fn read_bit(&mut self) -> Result<u32> {
        if self.byte >= self.data.len() {
            return Err(DemuxError::BadHeader("SPS 比特流越界".to_string()));
        }
        let b = (self.data[self.byte] >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(b as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut v = 0;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()?;
        }
        Ok(v)
    }

    /// 无符号指数哥伦布码
    fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(DemuxError::BadHeader("ue(v) 前导零过长".to_string()));
            }
        }
        let suffix = self.read_bits(zeros)?;
        Ok((1u32 << zeros) - 1 + suffix)
    }

    /// 有符号指数哥伦布码
    fn read_se(&mut self) -> Result<i32> {
        let ue = self.read_ue()?;
        let v = ((ue + 1) >> 1) as i32;
        Ok(if ue & 1 == 1 { v } else { -v })
    }
}

/// 去除防竞争字节（00 00 03 -> 00 00）
fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 从 SPS NAL（含 NAL 头字节）解析视频宽高
fn parse_sps_dimensions(sps: &[u8]) -> Result<(i32, i32)> {
    if sps.len() < 4 {
        return Err(DemuxError::BadHeader("SPS 过短".to_string()));
    }
    let rbsp = unescape_rbsp(&sps[1..]);
    let mut r = BitReader::new(&rbsp);

    let profile_idc = r.read_bits(8)?;
    let _constraints = r.read_bits(8)?;
    let _level_idc = r.read_bits(8)?;
    let _sps_id = r.read_ue()?;

    let mut chroma_format_idc = 1;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    ) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane = r.read_bit()?;
        }
        let _bit_depth_luma = r.read_ue()?;
        let _bit_depth_chroma = r.read_ue()?;
        let _qpprime = r.read_bit()?;
        if r.read_bit()? == 1 {
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if r.read_bit()? == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num = r.read_ue()?;
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_poc_lsb = r.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero = r.read_bit()?;
        let _offset_for_non_ref_pic = r.read_se()?;
        let _offset_for_top_to_bottom = r.read_se()?;
        let num_ref_frames_in_cycle = r.read_ue()?;
        for _ in 0..num_ref_frames_in_cycle {
            let _offset = r.read_se()?;
        }
    }
    let _max_num_ref_frames = r.read_ue()?;
    let _gaps_allowed = r.read_bit()?;

    let pic_width_in_mbs = r.read_ue()? + 1;
    let pic_height_in_map_units = r.read_ue()? + 1;
    let frame_mbs_only = r.read_bit()?;
    if frame_mbs_only == 0 {
        let _mb_adaptive = r.read_bit()?;
    }
    let _direct_8x8 = r.read_bit()?;

    let mut width = (pic_width_in_mbs * 16) as i32;
    let mut height = ((2 - frame_mbs_only) * pic_height_in_map_units * 16) as i32;

    if r.read_bit()? == 1 {
        // frame cropping
        let crop_left = r.read_ue()?;
        let crop_right = r.read_ue()?;
        let crop_top = r.read_ue()?;
        let crop_bottom = r.read_ue()?;
        let (sub_width_c, sub_height_c) = match chroma_format_idc {
            0 => (1, 1),
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let crop_unit_x = sub_width_c;
        let crop_unit_y = sub_height_c * (2 - frame_mbs_only);
        width -= (crop_unit_x * (crop_left + crop_right)) as i32;
        height -= (crop_unit_y * (crop_top + crop_bottom)) as i32;
    }

    if width <= 0 || height <= 0 {
        return Err(DemuxError::BadHeader(format!(
            "SPS 尺寸非法: {}x{}",
            width, height
        )));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    // baseline profile，640x480，无裁剪
    const TEST_SPS: [u8; 9] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80];
    const TEST_PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];

    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        // 44.1kHz（索引 4）、双声道、AAC-LC
        let len = 7 + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1,
            0x50,
            0x80 | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 0x07) << 5) | 0x1F) as u8,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn annexb(nal: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1];
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn test_parse_sps_dimensions() {
        assert_eq!(parse_sps_dimensions(&TEST_SPS).unwrap(), (640, 480));
    }

    #[test]
    fn test_aac_framing_and_format() {
        let mut q = ElementaryStreamQueue::new(StreamType::AacAdts);
        let f1 = adts_frame(&[1, 2, 3]);
        let f2 = adts_frame(&[4, 5]);
        let mut data = f1.clone();
        data.extend_from_slice(&f2);
        q.append(&data, 1000);

        let au1 = q.dequeue_access_unit().unwrap();
        assert_eq!(au1.data, f1);
        assert_eq!(au1.pts_us, 1000);
        let au2 = q.dequeue_access_unit().unwrap();
        assert_eq!(au2.data, f2);
        assert!(q.dequeue_access_unit().is_none());

        let format = q.format().unwrap();
        assert_eq!(format.find_str(MetaKey::MimeType), Some(mime::AUDIO_AAC));
        assert_eq!(format.find_i32(MetaKey::SampleRate), Some(44100));
        assert_eq!(format.find_i32(MetaKey::ChannelCount), Some(2));
        assert!(format.find_data(MetaKey::CodecHeader).is_some());
    }

    #[test]
    fn test_aac_resync_after_garbage() {
        let mut q = ElementaryStreamQueue::new(StreamType::AacAdts);
        let frame = adts_frame(&[7, 8, 9]);
        let mut data = vec![0x12, 0x34, 0x56];
        data.extend_from_slice(&frame);
        q.append(&data, 500);

        let au = q.dequeue_access_unit().unwrap();
        assert_eq!(au.data, frame);
        assert!(q.dequeue_access_unit().is_none());
    }

    #[test]
    fn test_aac_partial_frame_waits() {
        let mut q = ElementaryStreamQueue::new(StreamType::AacAdts);
        let frame = adts_frame(&[1; 20]);
        q.append(&frame[..10], 0);
        assert!(q.dequeue_access_unit().is_none());
        q.append(&frame[10..], 0);
        assert_eq!(q.dequeue_access_unit().unwrap().data, frame);
    }

    #[test]
    fn test_h264_unit_split_and_format() {
        let mut q = ElementaryStreamQueue::new(StreamType::H264);
        let sps = annexb(&TEST_SPS);
        let pps = annexb(&TEST_PPS);
        let idr = annexb(&[0x65, 0xAA, 0xBB]);
        let next = annexb(&[0x41, 0xCC]);

        let mut data = sps.clone();
        data.extend_from_slice(&pps);
        data.extend_from_slice(&idr);
        data.extend_from_slice(&next);
        q.append(&data, 2000);

        assert_eq!(q.dequeue_access_unit().unwrap().data, sps);
        assert_eq!(q.dequeue_access_unit().unwrap().data, pps);
        let format = q.format().unwrap();
        assert_eq!(format.find_i32(MetaKey::Width), Some(640));
        assert_eq!(format.find_i32(MetaKey::Height), Some(480));

        let au = q.dequeue_access_unit().unwrap();
        assert_eq!(au.data, idr);
        // 最后一个单元要等下一个起始码才能确界
        assert!(q.dequeue_access_unit().is_none());
    }

    #[test]
    fn test_h264_timestamp_ranges() {
        let mut q = ElementaryStreamQueue::new(StreamType::H264);
        let a = annexb(&[0x41, 1]);
        let b = annexb(&[0x41, 2]);
        let c = annexb(&[0x41, 3]);
        q.append(&a, 100);
        q.append(&b, 200);
        q.append(&c, 300);

        assert_eq!(q.dequeue_access_unit().unwrap().pts_us, 100);
        assert_eq!(q.dequeue_access_unit().unwrap().pts_us, 200);
    }

    #[test]
    fn test_clear_keeps_format_on_seek() {
        let mut q = ElementaryStreamQueue::new(StreamType::AacAdts);
        q.append(&adts_frame(&[1, 2]), 0);
        let _ = q.dequeue_access_unit();
        assert!(q.format().is_some());

        q.clear(false);
        assert!(q.format().is_some());
        q.clear(true);
        assert!(q.format().is_none());
    }
}
