/// Narrow no-break space, the French-Canadian thousands separator.
pub const NNBSP: char = '\u{202F}';

/// Format integer cents the fr-CA way: `1 234,56 $`, `-500,00 $`.
pub fn money_fr(cents: i64) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let int_part = (abs / 100).to_string();
    let dec_part = abs % 100;

    let mut grouped = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(NNBSP);
        }
        grouped.push(c);
    }
    let grouped: String = grouped.chars().rev().collect();

    if negative {
        format!("-{grouped},{dec_part:02} $")
    } else {
        format!("{grouped},{dec_part:02} $")
    }
}

/// Same as [`money_fr`] for a dollar value carried as `f64` (KPI cards).
pub fn money_fr_f64(val: f64) -> String {
    money_fr((val * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_fr_formatting() {
        assert_eq!(money_fr(123456), "1\u{202F}234,56 $");
        assert_eq!(money_fr(-50000), "-500,00 $");
        assert_eq!(money_fr(0), "0,00 $");
        assert_eq!(money_fr(100000099), "1\u{202F}000\u{202F}000,99 $");
        assert_eq!(money_fr(4210), "42,10 $");
        assert_eq!(money_fr(-5), "-0,05 $");
    }

    #[test]
    fn test_money_fr_f64() {
        assert_eq!(money_fr_f64(4250.0), "4\u{202F}250,00 $");
        assert_eq!(money_fr_f64(1416.666), "1\u{202F}416,67 $");
    }
}
