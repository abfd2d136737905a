//! XML-like rendering of A-XDR value streams.
//!
//! [`Printer`] receives values one by one, in the depth-first order produced
//! by [`crate::axdr::decode_tags`], and keeps an explicit [`LevelStack`] so
//! that containers are closed as soon as their last child has been printed.
//!
//! ```text
//! <Root Object="load_profile">
//! <Array size="1">
//!     <Structure size="2">
//!         <DateTime value="2018-3-9T8:0:0" />
//!         <Unsigned32 value="1234" />
//!     </Structure>
//! </Array>
//! </Root>
//! ```

use core::fmt::Write;

use crate::axdr::DataType;
use crate::datetime::{CosemDate, CosemDateTime, CosemTime, DATE_TIME_LEN};
use crate::unit::Unit;

const INDENT: &str = "    ";
const OBIS_LEN: usize = 6;

/// One open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLevel {
    pub tag: u8,
    pub declared: u32,
    pub emitted: u32,
}

impl RenderLevel {
    fn is_complete(&self) -> bool {
        self.emitted >= self.declared
    }
}

/// Stack of open containers.
#[derive(Debug, Default)]
pub struct LevelStack {
    levels: Vec<RenderLevel>,
}

impl LevelStack {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn push(&mut self, tag: u8, declared: u32) {
        self.levels.push(RenderLevel { tag, declared, emitted: 0 });
    }

    /// Counts one finished child against the innermost container, if any.
    pub fn count_child(&mut self) {
        if let Some(top) = self.levels.last_mut() {
            top.emitted += 1;
        }
    }

    /// Pops every completed level, innermost first. `close` is called after
    /// each pop with the popped level and the depth left behind it.
    pub fn close_completed<F>(&mut self, mut close: F)
    where
        F: FnMut(&RenderLevel, usize),
    {
        while self.levels.last().is_some_and(RenderLevel::is_complete) {
            if let Some(level) = self.levels.pop() {
                close(&level, self.levels.len());
            }
        }
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Element name for a tag; octet strings are named after what their length
/// suggests they hold.
pub fn tag_name(tag: u8, length: u32) -> &'static str {
    match DataType::try_from(tag) {
        Ok(DataType::Null) => "Null",
        Ok(DataType::Array) => "Array",
        Ok(DataType::Structure) => "Structure",
        Ok(DataType::Bool) => "Boolean",
        Ok(DataType::BitString) => "BitString",
        Ok(DataType::DoubleLong) => "Integer32",
        Ok(DataType::DoubleLongUnsigned) => "Unsigned32",
        Ok(DataType::OctetString) => match length as usize {
            OBIS_LEN => "OBIS",
            DATE_TIME_LEN => "DateTime",
            _ => "OctetString",
        },
        Ok(DataType::VisibleString) => "VisibleString",
        Ok(DataType::Utf8String) => "UTF8String",
        Ok(DataType::BinaryCodedDecimal) => "BCD",
        Ok(DataType::Integer) => "Integer8",
        Ok(DataType::Long) => "Integer16",
        Ok(DataType::Unsigned) => "Unsigned8",
        Ok(DataType::LongUnsigned) => "Unsigned16",
        Ok(DataType::Long64) => "Integer64",
        Ok(DataType::Long64Unsigned) => "Unsigned64",
        Ok(DataType::Enum) => "Enum",
        Ok(DataType::Float32) => "Float32",
        Ok(DataType::Float64) => "Float64",
        Ok(DataType::DateTime) => "DateTime",
        Ok(DataType::Date) => "Date",
        Ok(DataType::Time) => "Time",
        Ok(DataType::CompactArray) | Err(_) => "Unknown",
    }
}

fn be_array<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
    data.get(..N)?.try_into().ok()
}

fn render_date_time(data: &[u8]) -> String {
    match CosemDateTime::from_bytes(data) {
        Some(value) => value.to_string(),
        None => "InvalidDateTimeFormat".to_string(),
    }
}

/// Textual value of a scalar. Short content renders as an empty string.
pub fn render_value(tag: u8, data: &[u8]) -> String {
    let Ok(data_type) = DataType::try_from(tag) else {
        return String::new();
    };

    let text = match data_type {
        DataType::Null => Some("null".to_string()),
        DataType::Bool => data.first().map(|&b| (if b == 0 { "false" } else { "true" }).to_string()),
        DataType::BitString => {
            Some(data.iter().map(|byte| format!("{:08b}", byte)).collect::<String>())
        }
        DataType::DoubleLong => be_array(data).map(|b| i32::from_be_bytes(b).to_string()),
        DataType::DoubleLongUnsigned => be_array(data).map(|b| u32::from_be_bytes(b).to_string()),
        DataType::OctetString => Some(match data.len() {
            OBIS_LEN => {
                data.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(".")
            }
            DATE_TIME_LEN => render_date_time(data),
            _ => data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
                let _ = write!(out, "{:02x}", b);
                out
            }),
        }),
        DataType::VisibleString | DataType::Utf8String => {
            Some(String::from_utf8_lossy(data).into_owned())
        }
        DataType::BinaryCodedDecimal | DataType::Unsigned | DataType::Enum => {
            data.first().map(|&code| Unit::render_code(code))
        }
        DataType::Integer => data.first().map(|&b| (b as i8).to_string()),
        DataType::Long => be_array(data).map(|b| i16::from_be_bytes(b).to_string()),
        DataType::LongUnsigned => be_array(data).map(|b| u16::from_be_bytes(b).to_string()),
        DataType::Long64 => be_array(data).map(|b| i64::from_be_bytes(b).to_string()),
        DataType::Long64Unsigned => be_array(data).map(|b| u64::from_be_bytes(b).to_string()),
        DataType::Float32 => be_array(data).map(|b| f32::from_be_bytes(b).to_string()),
        DataType::Float64 => be_array(data).map(|b| f64::from_be_bytes(b).to_string()),
        DataType::DateTime => Some(render_date_time(data)),
        DataType::Date => CosemDate::parse(data).ok().map(|(_, date)| date.to_string()),
        DataType::Time => CosemTime::parse(data).ok().map(|(_, time)| time.to_string()),
        DataType::Array | DataType::Structure | DataType::CompactArray => None,
    };

    text.unwrap_or_default()
}

/// Stack based renderer of a flat value stream.
#[derive(Debug, Default)]
pub struct Printer {
    out: String,
    stack: LevelStack,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the output and opens the root element.
    pub fn start(&mut self, header: &str) {
        self.out.clear();
        self.stack.clear();
        if header.is_empty() {
            self.out.push_str("<Root>\n");
        } else {
            let _ = writeln!(self.out, "<Root {}>", header);
        }
    }

    pub fn append(&mut self, tag: u8, length: u32, data: &[u8]) {
        let name = tag_name(tag, length);
        self.indent(self.stack.depth());

        if matches!(DataType::try_from(tag), Ok(data_type) if data_type.is_container()) {
            let _ = writeln!(self.out, "<{} size=\"{}\">", name, length);
            self.stack.count_child();
            self.stack.push(tag, length);
        } else {
            let _ = writeln!(self.out, "<{} value=\"{}\" />", name, render_value(tag, data));
            self.stack.count_child();
        }

        let out = &mut self.out;
        self.stack.close_completed(|level, depth| {
            out.push_str(&INDENT.repeat(depth));
            let _ = writeln!(out, "</{}>", tag_name(level.tag, level.declared));
        });
    }

    pub fn end(&mut self) {
        self.out.push_str("</Root>\n");
    }

    pub fn get(&self) -> &str {
        &self.out
    }

    /// Number of containers still waiting for children.
    pub fn open_levels(&self) -> usize {
        self.stack.depth()
    }

    fn indent(&mut self, depth: usize) {
        self.out.push_str(&INDENT.repeat(depth));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axdr::decode_tags;

    fn render(stream: &[(u8, u32, &[u8])]) -> String {
        let mut printer = Printer::new();
        printer.start("");
        for (tag, length, data) in stream {
            printer.append(*tag, *length, data);
        }
        printer.end();
        printer.get().to_string()
    }

    #[test]
    fn test_level_stack_cascading_close() {
        let mut stack = LevelStack::default();
        stack.push(0x01, 1);
        stack.count_child();
        stack.push(0x02, 1);
        stack.count_child();

        let mut closed = Vec::new();
        stack.close_completed(|level, depth| closed.push((level.tag, depth)));

        // The last child of the structure also completes the enclosing array
        assert_eq!(closed, vec![(0x02, 1), (0x01, 0)]);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_level_stack_keeps_incomplete_levels() {
        let mut stack = LevelStack::default();
        stack.push(0x02, 3);
        stack.count_child();
        stack.count_child();

        let mut calls = 0;
        stack.close_completed(|_, _| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_nested_containers_close_once() {
        let text = render(&[
            (0x01, 1, &[]),
            (0x02, 2, &[]),
            (0x12, 2, &[0x00, 0x2A]),
            (0x11, 1, &[0x1E]),
        ]);

        assert_eq!(
            text,
            "<Root>\n\
             <Array size=\"1\">\n\
             \x20   <Structure size=\"2\">\n\
             \x20       <Unsigned16 value=\"42\" />\n\
             \x20       <Unsigned8 value=\"Wh\" />\n\
             \x20   </Structure>\n\
             </Array>\n\
             </Root>\n"
        );
    }

    #[test]
    fn test_container_closes_after_last_child_only() {
        let mut printer = Printer::new();
        printer.start("Object=\"x\"");
        assert_eq!(printer.get(), "<Root Object=\"x\">\n");

        for n in 1..=4u32 {
            printer.append(0x02, n, &[]);
            for i in 0..n {
                assert_eq!(printer.open_levels(), 1);
                printer.append(0x0F, 1, &[i as u8]);
            }
            assert_eq!(printer.open_levels(), 0);
            assert!(printer.get().ends_with("</Structure>\n"));
        }
        assert_eq!(printer.get().matches("</Structure>").count(), 4);
    }

    #[test]
    fn test_empty_array_closes_immediately() {
        let text = render(&[(0x01, 0, &[]), (0x11, 1, &[0x23])]);
        assert_eq!(
            text,
            "<Root>\n<Array size=\"0\">\n</Array>\n<Unsigned8 value=\"V\" />\n</Root>\n"
        );
    }

    #[test]
    fn test_unknown_tag_counts_as_child() {
        let text = render(&[(0x02, 2, &[]), (0x42, 0, &[]), (0x42, 0, &[])]);
        assert!(text.contains("<Unknown value=\"\" />"));
        assert!(text.contains("</Structure>"));
    }

    #[test]
    fn test_bit_string_renders_eight_chars_per_byte() {
        let value = render_value(0x04, &[0b1000_0001, 0x0F, 0x00]);
        assert_eq!(value, "100000010000111100000000");
        assert_eq!(value.len(), 24);
        assert!(value.chars().all(|c| c == '0' || c == '1'));
    }

    #[test]
    fn test_octet_string_readings() {
        assert_eq!(render_value(0x09, &[1, 0, 1, 8, 0, 255]), "1.0.1.8.0.255");
        assert_eq!(tag_name(0x09, 6), "OBIS");

        let date = [0x07, 0xE2, 0x03, 0x09, 0x05, 0x08, 0x00, 0x00, 0x00, 0x80, 0x00, 0xFF];
        assert_eq!(render_value(0x09, &date), "2018-3-9T8:0:0");
        assert_eq!(tag_name(0x09, 12), "DateTime");

        let invalid = [0x07, 0xE2, 0x0E, 0x09, 0x05, 0x08, 0x00, 0x00, 0x00, 0x80, 0x00, 0xFF];
        assert_eq!(render_value(0x09, &invalid), "InvalidDateTimeFormat");

        let other = [0xDE, 0xAD, 0xBE, 0xEF, 0x01];
        assert_eq!(render_value(0x09, &other), "deadbeef01");
        assert_eq!(tag_name(0x09, 5), "OctetString");
    }

    #[test]
    fn test_integer_signedness_follows_tag() {
        assert_eq!(render_value(0x0F, &[0xFE]), "-2");
        assert_eq!(render_value(0x10, &[0xFF, 0x9C]), "-100");
        assert_eq!(render_value(0x12, &[0xFF, 0x9C]), "65436");
        assert_eq!(render_value(0x05, &[0xFF, 0xFF, 0xFF, 0xFF]), "-1");
        assert_eq!(render_value(0x06, &[0xFF, 0xFF, 0xFF, 0xFF]), "4294967295");
        assert_eq!(render_value(0x14, &[0xFF; 8]), "-1");
        assert_eq!(render_value(0x15, &[0, 0, 0, 0, 0, 0, 1, 0]), "256");
    }

    #[test]
    fn test_scalar_readings() {
        assert_eq!(render_value(0x00, &[]), "null");
        assert_eq!(render_value(0x03, &[0x00]), "false");
        assert_eq!(render_value(0x03, &[0x05]), "true");
        assert_eq!(render_value(0x0A, b"LGZ"), "LGZ");
        assert_eq!(render_value(0x16, &[0xC8]), "UnknownUnit: 200");
        assert_eq!(render_value(0x0D, &[0x21]), "A");
        assert_eq!(render_value(0x17, &1.5f32.to_be_bytes()), "1.5");
        assert_eq!(render_value(0x1A, &[0x07, 0xE2, 0x03, 0x09, 0xFF]), "2018-3-9");
        assert_eq!(render_value(0x1B, &[0x0C, 0x1E, 0x00, 0x00]), "12:30:0");
    }

    #[test]
    fn test_fresh_printers_render_identically() {
        let stream = [
            0x01, 0x02, 0x02, 0x02, 0x09, 0x06, 1, 0, 1, 8, 0, 255, 0x06, 0, 0, 0x30, 0x39,
            0x02, 0x02, 0x09, 0x06, 1, 0, 2, 8, 0, 255, 0x06, 0, 0, 0, 7,
        ];

        let run = || {
            let mut printer = Printer::new();
            printer.start("Object=\"energy\"");
            decode_tags(&stream, |tag, length, data| printer.append(tag, length, data)).unwrap();
            printer.end();
            printer.get().to_string()
        };

        let first = run();
        assert_eq!(first, run());
        assert_eq!(first.matches("</Structure>").count(), 2);
        assert!(first.contains("<OBIS value=\"1.0.1.8.0.255\" />"));
        assert!(first.contains("<Unsigned32 value=\"12345\" />"));
        assert!(first.ends_with("    </Structure>\n</Array>\n</Root>\n"));
    }
}
