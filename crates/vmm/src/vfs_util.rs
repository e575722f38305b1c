use crate::vfs::VfsStatus;
use std::fmt::Write as _;

/// Serve `buf` from `data` at `offset`.
pub fn read_bytes(data: &[u8], buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    let Ok(offset) = usize::try_from(offset) else {
        return (VfsStatus::EndOfFile, 0);
    };
    if offset >= data.len() {
        return (VfsStatus::EndOfFile, 0);
    }
    let n = buf.len().min(data.len() - offset);
    buf[..n].copy_from_slice(&data[offset..offset + n]);
    (VfsStatus::Success, n)
}

pub fn read_text(text: &str, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    read_bytes(text.as_bytes(), buf, offset)
}

pub fn read_u64_hex(value: u64, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    read_text(&format!("{value:016x}"), buf, offset)
}

pub fn read_u32_hex(value: u32, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    read_text(&format!("{value:08x}"), buf, offset)
}

pub fn read_u64_dec(value: u64, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    read_text(&value.to_string(), buf, offset)
}

pub fn read_bool(value: bool, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
    read_text(if value { "1" } else { "0" }, buf, offset)
}

fn written_text(data: &[u8], offset: u64) -> Option<&str> {
    if offset != 0 {
        return None;
    }
    std::str::from_utf8(data)
        .ok()
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
}

/// Parse a written number: decimal, or hex with a `0x` prefix.
pub fn write_u64(data: &[u8], offset: u64) -> Option<u64> {
    let text = written_text(data, offset)?;
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

pub fn write_bool(data: &[u8], offset: u64) -> Option<bool> {
    match written_text(data, offset)? {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Hex and ASCII dump, 16 bytes per line, addresses starting at `base`.
pub fn hexdump(data: &[u8], base: u64) -> String {
    let mut out = String::with_capacity(data.len() * 4 + data.len() / 16 * 20);
    for (i, line) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:016x} ", base + i as u64 * 16);
        for j in 0..16 {
            if j == 8 {
                out.push(' ');
            }
            match line.get(j) {
                Some(b) => {
                    let _ = write!(out, " {b:02x}");
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_past_end_is_end_of_file() {
        let mut buf = [0u8; 4];
        assert_eq!(read_text("abc", &mut buf, 3), (VfsStatus::EndOfFile, 0));
        assert_eq!(read_text("abc", &mut buf, u64::MAX), (VfsStatus::EndOfFile, 0));
        assert_eq!(read_text("abc", &mut buf, 1), (VfsStatus::Success, 2));
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn numbers_render_fixed_width() {
        let mut buf = [0u8; 32];
        let (_, n) = read_u64_hex(0x1234, &mut buf, 0);
        assert_eq!(&buf[..n], b"0000000000001234");
        let (_, n) = read_u32_hex(0xab, &mut buf, 0);
        assert_eq!(&buf[..n], b"000000ab");
    }

    #[test]
    fn writes_parse_decimal_hex_and_bool() {
        assert_eq!(write_u64(b"250\n", 0), Some(250));
        assert_eq!(write_u64(b"0x10", 0), Some(16));
        assert_eq!(write_u64(b"12", 1), None);
        assert_eq!(write_u64(b"ten", 0), None);
        assert_eq!(write_bool(b"1", 0), Some(true));
        assert_eq!(write_bool(b"false\0", 0), Some(false));
    }

    #[test]
    fn hexdump_pads_short_lines() {
        let dump = hexdump(b"ABCDEFGHIJKLMNOPQR\x00", 0x1000);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0000000000001000  41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  ABCDEFGHIJKLMNOP"
        );
        assert!(lines[1].starts_with("0000000000001010  51 52 00"));
        assert!(lines[1].ends_with("  QR."));
    }
}
