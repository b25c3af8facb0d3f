//! 二进制读取游标
//!
//! VMD / PMX / PMD 共用的小端读取器。所有读取都先检查剩余长度，
//! 越界时返回带字节偏移的 [`ParseError`]，不会 panic。

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Vec3, Vec4};

use crate::{ParseError, ParseErrorReason};

/// 可变长文本的编码（PMX 全局设置第 0 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    Utf8,
}

/// 小端二进制游标
pub struct BinaryCursor<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    /// 当前字节偏移
    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// 在当前位置构造错误
    pub fn error(&self, reason: ParseErrorReason) -> ParseError {
        ParseError::new(self.position(), reason)
    }

    fn ensure(&self, needed: usize) -> Result<(), ParseError> {
        let available = self.remaining();
        if available < needed {
            return Err(self.error(ParseErrorReason::Truncated { needed, available }));
        }
        Ok(())
    }

    fn io_error(&self, e: std::io::Error) -> ParseError {
        self.error(ParseErrorReason::InvalidValue(e.to_string()))
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.ensure(1)?;
        self.inner.read_u8().map_err(|e| self.io_error(e))
    }

    pub fn read_i8(&mut self) -> Result<i8, ParseError> {
        self.ensure(1)?;
        self.inner.read_i8().map_err(|e| self.io_error(e))
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        self.ensure(2)?;
        self.inner.read_u16::<LittleEndian>().map_err(|e| self.io_error(e))
    }

    pub fn read_i16(&mut self) -> Result<i16, ParseError> {
        self.ensure(2)?;
        self.inner.read_i16::<LittleEndian>().map_err(|e| self.io_error(e))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        self.ensure(4)?;
        self.inner.read_u32::<LittleEndian>().map_err(|e| self.io_error(e))
    }

    pub fn read_i32(&mut self) -> Result<i32, ParseError> {
        self.ensure(4)?;
        self.inner.read_i32::<LittleEndian>().map_err(|e| self.io_error(e))
    }

    pub fn read_f32(&mut self) -> Result<f32, ParseError> {
        self.ensure(4)?;
        self.inner.read_f32::<LittleEndian>().map_err(|e| self.io_error(e))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, ParseError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec4(&mut self) -> Result<Vec4, ParseError> {
        Ok(Vec4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// 读取定长字节块
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.ensure(len)?;
        let start = self.position();
        let data: &'a [u8] = *self.inner.get_ref();
        self.inner.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        self.ensure(N)?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| self.io_error(e))?;
        Ok(buf)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ParseError> {
        self.read_bytes(len).map(|_| ())
    }

    /// 定长 Shift-JIS 名称（遇 NUL 截断）
    pub fn read_fixed_sjis(&mut self, len: usize) -> Result<String, ParseError> {
        Ok(decode_shift_jis(self.read_bytes(len)?))
    }

    /// 读取记录数，并确认剩余字节足够容纳 `count * min_record_size`
    ///
    /// 记录数本身越界（负数或超过缓冲区）时报告在计数字段的偏移处。
    pub fn read_count_i32(&mut self, min_record_size: usize) -> Result<usize, ParseError> {
        let at = self.position();
        let raw = self.read_i32()?;
        self.validate_count(at, raw as i64, min_record_size)
    }

    pub fn read_count_u32(&mut self, min_record_size: usize) -> Result<usize, ParseError> {
        let at = self.position();
        let raw = self.read_u32()?;
        self.validate_count(at, raw as i64, min_record_size)
    }

    pub fn read_count_u16(&mut self, min_record_size: usize) -> Result<usize, ParseError> {
        let at = self.position();
        let raw = self.read_u16()?;
        self.validate_count(at, raw as i64, min_record_size)
    }

    fn validate_count(&self, at: usize, raw: i64, min_record_size: usize) -> Result<usize, ParseError> {
        let fits = raw >= 0
            && (raw as u64).saturating_mul(min_record_size as u64) <= self.remaining() as u64;
        if !fits {
            return Err(ParseError::new(at, ParseErrorReason::LengthOutOfRange(raw)));
        }
        Ok(raw as usize)
    }

    /// PMX 可变长文本：i32 字节长度 + 内容
    pub fn read_text(&mut self, encoding: TextEncoding) -> Result<String, ParseError> {
        let len = self.read_count_i32(1)?;
        let bytes = self.read_bytes(len)?;
        let (decoded, _) = match encoding {
            TextEncoding::Utf16Le => encoding_rs::UTF_16LE.decode_without_bom_handling(bytes),
            TextEncoding::Utf8 => encoding_rs::UTF_8.decode_without_bom_handling(bytes),
        };
        Ok(decoded.into_owned())
    }

    /// 有符号索引（骨骼 / 材质 / Morph / 刚体 / 纹理），-1 表示无
    pub fn read_index(&mut self, size: u8) -> Result<i32, ParseError> {
        match size {
            1 => Ok(self.read_i8()? as i32),
            2 => Ok(self.read_i16()? as i32),
            4 => self.read_i32(),
            other => Err(self.error(ParseErrorReason::InvalidValue(format!(
                "index size {}",
                other
            )))),
        }
    }

    /// 顶点索引（1、2 字节为无符号）
    pub fn read_vertex_index(&mut self, size: u8) -> Result<u32, ParseError> {
        match size {
            1 => Ok(self.read_u8()? as u32),
            2 => Ok(self.read_u16()? as u32),
            4 => Ok(self.read_i32()? as u32),
            other => Err(self.error(ParseErrorReason::InvalidValue(format!(
                "vertex index size {}",
                other
            )))),
        }
    }
}

/// 解码 Shift-JIS 字符串（第一个 NUL 之后的填充字节丢弃）
pub fn decode_shift_jis(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(&bytes[..end]);
    decoded.into_owned()
}

/// 编码为定长 Shift-JIS 字段，不足补 0，超长截断
pub fn encode_shift_jis(text: &str, len: usize) -> Vec<u8> {
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(text);
    let mut out = vec![0u8; len];
    let n = encoded.len().min(len);
    out[..n].copy_from_slice(&encoded[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_read_reports_offset() {
        let data = [1u8, 0, 0];
        let mut cursor = BinaryCursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 1);
        let err = cursor.read_u32().unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(
            err.reason,
            ParseErrorReason::Truncated {
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn oversized_count_is_rejected_at_count_offset() {
        let mut data = vec![0u8; 8];
        data[..4].copy_from_slice(&1000u32.to_le_bytes());
        let mut cursor = BinaryCursor::new(&data);
        let err = cursor.read_count_u32(23).unwrap_err();
        assert_eq!(err.offset, 0);
        assert_eq!(err.reason, ParseErrorReason::LengthOutOfRange(1000));
    }

    #[test]
    fn shift_jis_round_trip_stops_at_nul() {
        let field = encode_shift_jis("センター", 15);
        assert_eq!(field.len(), 15);
        assert_eq!(decode_shift_jis(&field), "センター");
    }

    #[test]
    fn utf16_text_is_decoded() {
        let text: Vec<u8> = "頭".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut data = (text.len() as i32).to_le_bytes().to_vec();
        data.extend_from_slice(&text);
        let mut cursor = BinaryCursor::new(&data);
        assert_eq!(cursor.read_text(TextEncoding::Utf16Le).unwrap(), "頭");
        assert!(cursor.is_empty());
    }
}
