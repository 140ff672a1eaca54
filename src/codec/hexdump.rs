//! Text hexdump and header summaries for captured frames

use super::parse;

/// Classic `offset  hex pairs  |ascii|` dump. An extra space splits each row at its midpoint.
pub fn hexdump(data: &[u8], columns: usize) -> String {
    if data.is_empty() {
        return "(empty)".to_string();
    }
    let columns = columns.max(1);
    let hex_width = columns * 3;

    data.chunks(columns)
        .enumerate()
        .map(|(row, chunk)| {
            let mut hex = String::with_capacity(hex_width);
            for (i, byte) in chunk.iter().enumerate() {
                if i > 0 {
                    hex.push(' ');
                }
                if i == columns / 2 && i > 0 {
                    hex.push(' ');
                }
                hex.push_str(&format!("{byte:02x}"));
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                .collect();
            format!(
                "{:04x}  {:<width$}  |{}|",
                row * columns,
                hex,
                ascii,
                width = hex_width
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parsed one-line header description, or the decode error when the bytes do not parse.
pub fn frame_summary(bytes: &[u8]) -> String {
    match parse(bytes) {
        Ok(frame) => frame.summary(),
        Err(e) => format!("undecodable frame ({} bytes): {}", bytes.len(), e),
    }
}
