//! Physical unit codes of the COSEM `scal_unit_type` enumeration.

use core::fmt;

/// Code and symbol, sorted by code. Reserved ranges (58-59, 68-69, 73-253)
/// and the codes 254 (other) and 255 (count) have no symbol.
#[rustfmt::skip]
const SYMBOLS: &[(u8, &str)] = &[
    (1, "a"), (2, "mo"), (3, "wk"), (4, "d"), (5, "h"), (6, "min"), (7, "s"),
    (8, "°"), (9, "°C"), (10, "currency"), (11, "m"), (12, "m/s"),
    (13, "m³"), (14, "m³"), (15, "m³/h"), (16, "m³/h"), (17, "m³/d"), (18, "m³/d"),
    (19, "l"), (20, "kg"), (21, "N"), (22, "Nm"), (23, "Pa"), (24, "bar"),
    (25, "J"), (26, "J/h"),
    (27, "W"), (28, "VA"), (29, "var"), (30, "Wh"), (31, "VAh"), (32, "varh"),
    (33, "A"), (34, "C"), (35, "V"), (36, "V/m"), (37, "F"), (38, "Ω"), (39, "Ωm"),
    (40, "Wb"), (41, "T"), (42, "A/m"), (43, "H"), (44, "Hz"),
    (45, "1/(Wh)"), (46, "1/(varh)"), (47, "1/(VAh)"), (48, "V²h"), (49, "A²h"),
    (50, "kg/s"), (51, "S"), (52, "K"), (53, "1/(V²h)"), (54, "1/(A²h)"),
    (55, "1/m³"), (56, "%"), (57, "Ah"),
    (60, "Wh/m³"), (61, "J/m³"), (62, "Mol %"), (63, "g/m³"), (64, "Pa s"),
    (65, "J/kg"), (66, "g/cm²"), (67, "atm"),
    (70, "dBm"), (71, "dBµV"), (72, "dB"),
];

/// A raw unit code as found in a scaler-unit structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit(pub u8);

impl Unit {
    pub fn symbol(self) -> Option<&'static str> {
        SYMBOLS
            .binary_search_by_key(&self.0, |&(code, _)| code)
            .ok()
            .map(|index| SYMBOLS[index].1)
    }

    /// Renders a raw unit code as its symbol, or `UnknownUnit: N` when the
    /// code has none.
    pub fn render_code(code: u8) -> String {
        Unit(code).to_string()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => write!(f, "UnknownUnit: {}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_known_electrical_codes() {
        assert_eq!(Unit::render_code(27), "W");
        assert_eq!(Unit::render_code(30), "Wh");
        assert_eq!(Unit::render_code(32), "varh");
        assert_eq!(Unit::render_code(35), "V");
        assert_eq!(Unit::render_code(44), "Hz");
    }

    #[test]
    fn test_render_reserved_code() {
        assert_eq!(Unit::render_code(0), "UnknownUnit: 0");
        assert_eq!(Unit::render_code(58), "UnknownUnit: 58");
        assert_eq!(Unit::render_code(100), "UnknownUnit: 100");
        assert_eq!(Unit::render_code(254), "UnknownUnit: 254");
        assert_eq!(Unit::render_code(255), "UnknownUnit: 255");
    }

    #[test]
    fn test_table_is_sorted() {
        assert!(SYMBOLS.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert_eq!(Unit(72).symbol(), Some("dB"));
        assert_eq!(Unit(1).symbol(), Some("a"));
    }
}
