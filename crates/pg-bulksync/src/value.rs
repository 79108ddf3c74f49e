//! Typed values and their PostgreSQL binary COPY encodings.
//!
//! Each value is written as a 4-byte length followed by the type's binary
//! payload; NULL is length -1 with no payload. Temporal types use the
//! PostgreSQL epoch (2000-01-01), NUMERIC uses the base-10000 digit format.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single column value destined for the binary COPY stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL for any column type.
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// timestamp without time zone.
    Timestamp(NaiveDateTime),
    /// timestamp with time zone, stored as UTC.
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl SqlValue {
    /// Append this value's length-prefixed binary representation to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            SqlValue::Null => {
                buf.put_i32(-1);
            }
            SqlValue::Bool(b) => {
                buf.put_i32(1);
                buf.put_u8(u8::from(*b));
            }
            SqlValue::I16(v) => {
                buf.put_i32(2);
                buf.put_i16(*v);
            }
            SqlValue::I32(v) => {
                buf.put_i32(4);
                buf.put_i32(*v);
            }
            SqlValue::I64(v) => {
                buf.put_i32(8);
                buf.put_i64(*v);
            }
            SqlValue::F32(v) => {
                buf.put_i32(4);
                buf.put_f32(*v);
            }
            SqlValue::F64(v) => {
                buf.put_i32(8);
                buf.put_f64(*v);
            }
            SqlValue::Text(s) => {
                buf.put_i32(s.len() as i32);
                buf.put_slice(s.as_bytes());
            }
            SqlValue::Bytes(b) => {
                buf.put_i32(b.len() as i32);
                buf.put_slice(b);
            }
            SqlValue::Uuid(u) => {
                buf.put_i32(16);
                buf.put_slice(u.as_bytes());
            }
            SqlValue::Decimal(d) => encode_numeric(buf, d),
            SqlValue::Timestamp(ts) => {
                buf.put_i32(8);
                buf.put_i64(micros_since_pg_epoch(ts));
            }
            SqlValue::TimestampTz(ts) => {
                buf.put_i32(8);
                buf.put_i64(micros_since_pg_epoch(&ts.naive_utc()));
            }
            SqlValue::Date(d) => {
                let days = (*d - pg_epoch_date()).num_days() as i32;
                buf.put_i32(4);
                buf.put_i32(days);
            }
            SqlValue::Time(t) => {
                let micros = t.num_seconds_from_midnight() as i64 * 1_000_000
                    + (t.nanosecond() / 1000) as i64;
                buf.put_i32(8);
                buf.put_i64(micros);
            }
        }
    }
}

/// The PostgreSQL date epoch.
fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

/// Microseconds between `ts` and 2000-01-01 00:00:00.
fn micros_since_pg_epoch(ts: &NaiveDateTime) -> i64 {
    let epoch = pg_epoch_date().and_hms_opt(0, 0, 0).unwrap();
    (*ts - epoch).num_microseconds().unwrap_or(0)
}

const NUMERIC_POS: i16 = 0x0000;
const NUMERIC_NEG: i16 = 0x4000;

/// Encode a decimal in the NUMERIC wire format.
///
/// Layout: ndigits (i16), weight (i16, position of the first base-10000 digit
/// relative to the decimal point), sign (i16), dscale (i16), then the
/// base-10000 digits.
fn encode_numeric(buf: &mut BytesMut, value: &Decimal) {
    let dscale = value.scale() as i16;

    if value.is_zero() {
        buf.put_i32(8);
        buf.put_i16(0); // ndigits
        buf.put_i16(0); // weight
        buf.put_i16(NUMERIC_POS);
        buf.put_i16(dscale);
        return;
    }

    let sign = if value.is_sign_negative() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    // Group base-10 digits into base-10000 digits on both sides of the
    // decimal point: the integer part pads on the left, the fractional part
    // on the right, so group boundaries line up with the point.
    let text = value.abs().to_string();
    let (int_part, frac_part) = match text.find('.') {
        Some(dot) => (&text[..dot], &text[dot + 1..]),
        None => (text.as_str(), ""),
    };

    let mut digits: Vec<i16> = Vec::new();

    let int_trimmed = int_part.trim_start_matches('0');
    if !int_trimmed.is_empty() {
        let padded = format!("{:0>width$}", int_trimmed, width = int_trimmed.len().div_ceil(4) * 4);
        for group in padded.as_bytes().chunks(4) {
            digits.push(std::str::from_utf8(group).unwrap().parse::<i16>().unwrap());
        }
    }
    let int_groups = digits.len() as i16;

    if !frac_part.is_empty() {
        let mut padded = frac_part.to_string();
        while padded.len() % 4 != 0 {
            padded.push('0');
        }
        for group in padded.as_bytes().chunks(4) {
            digits.push(std::str::from_utf8(group).unwrap().parse::<i16>().unwrap());
        }
    }

    // Weight of the first digit: one less than the number of integer groups,
    // or negative when the value is purely fractional with leading zero
    // groups (0.0001 has weight -1, 0.00000001 has weight -2).
    let weight = if int_groups > 0 {
        int_groups - 1
    } else {
        let leading_zero_groups = digits.iter().take_while(|d| **d == 0).count() as i16;
        -(leading_zero_groups + 1)
    };

    // The server stores neither trailing nor leading zero digits; dscale
    // alone preserves display scale.
    while digits.len() > 1 && *digits.last().unwrap() == 0 {
        digits.pop();
    }
    while digits.len() > 1 && digits[0] == 0 {
        digits.remove(0);
    }

    let ndigits = digits.len() as i16;
    buf.put_i32(8 + i32::from(ndigits) * 2);
    buf.put_i16(ndigits);
    buf.put_i16(weight);
    buf.put_i16(sign);
    buf.put_i16(dscale);
    for digit in digits {
        buf.put_i16(digit);
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::F32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Bytes(v.to_vec())
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::TimestampTz(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<V: Into<SqlValue>> From<Option<V>> for SqlValue {
    fn from(v: Option<V>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    fn encoded(value: &SqlValue) -> BytesMut {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        buf
    }

    /// Parse a NUMERIC field back out of an encoded buffer.
    fn parse_numeric(buf: &[u8]) -> (i32, i16, i16, i16, i16, Vec<i16>) {
        let mut cursor = std::io::Cursor::new(buf);
        let len = cursor.get_i32();
        let ndigits = cursor.get_i16();
        let weight = cursor.get_i16();
        let sign = cursor.get_i16();
        let dscale = cursor.get_i16();
        let mut digits = Vec::new();
        for _ in 0..ndigits {
            digits.push(cursor.get_i16());
        }
        (len, ndigits, weight, sign, dscale, digits)
    }

    #[test]
    fn test_encode_null() {
        let buf = encoded(&SqlValue::Null);
        assert_eq!(&buf[..], &(-1i32).to_be_bytes());
    }

    #[test]
    fn test_encode_bool() {
        let buf = encoded(&SqlValue::Bool(true));
        assert_eq!(&buf[..], &[0, 0, 0, 1, 1]);
        let buf = encoded(&SqlValue::Bool(false));
        assert_eq!(&buf[..], &[0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_encode_integers() {
        assert_eq!(&encoded(&SqlValue::I16(7))[..], &[0, 0, 0, 2, 0, 7]);
        assert_eq!(&encoded(&SqlValue::I32(1))[..], &[0, 0, 0, 4, 0, 0, 0, 1]);
        let buf = encoded(&SqlValue::I64(-1));
        assert_eq!(&buf[..4], &8i32.to_be_bytes());
        assert_eq!(&buf[4..], &(-1i64).to_be_bytes());
    }

    #[test]
    fn test_encode_text() {
        let buf = encoded(&SqlValue::Text("hi".to_string()));
        assert_eq!(&buf[..], &[0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_encode_uuid_is_sixteen_bytes() {
        let buf = encoded(&SqlValue::Uuid(Uuid::nil()));
        assert_eq!(buf.len(), 4 + 16);
        assert_eq!(&buf[..4], &16i32.to_be_bytes());
    }

    #[test]
    fn test_encode_date_epoch_is_zero_days() {
        let buf = encoded(&SqlValue::Date(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()));
        assert_eq!(&buf[..], &[0, 0, 0, 4, 0, 0, 0, 0]);
        let buf = encoded(&SqlValue::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()));
        assert_eq!(&buf[4..], &1i32.to_be_bytes());
    }

    #[test]
    fn test_encode_timestamp_epoch_is_zero_micros() {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let buf = encoded(&SqlValue::Timestamp(epoch));
        assert_eq!(&buf[4..], &0i64.to_be_bytes());

        let one_second = epoch + chrono::Duration::seconds(1);
        let buf = encoded(&SqlValue::Timestamp(one_second));
        assert_eq!(&buf[4..], &1_000_000i64.to_be_bytes());
    }

    #[test]
    fn test_encode_time_micros_since_midnight() {
        let t = NaiveTime::from_hms_opt(0, 0, 1).unwrap();
        let buf = encoded(&SqlValue::Time(t));
        assert_eq!(&buf[4..], &1_000_000i64.to_be_bytes());
    }

    #[test]
    fn test_numeric_zero() {
        let buf = encoded(&SqlValue::Decimal(Decimal::ZERO));
        let (len, ndigits, weight, sign, dscale, digits) = parse_numeric(&buf);
        assert_eq!(len, 8);
        assert_eq!(ndigits, 0);
        assert_eq!(weight, 0);
        assert_eq!(sign, NUMERIC_POS);
        assert_eq!(dscale, 0);
        assert!(digits.is_empty());
    }

    #[test]
    fn test_numeric_integer() {
        let buf = encoded(&SqlValue::Decimal("12345".parse().unwrap()));
        let (len, ndigits, weight, sign, dscale, digits) = parse_numeric(&buf);
        assert_eq!(len, 8 + 4);
        assert_eq!(ndigits, 2);
        assert_eq!(weight, 1);
        assert_eq!(sign, NUMERIC_POS);
        assert_eq!(dscale, 0);
        assert_eq!(digits, vec![1, 2345]);
    }

    #[test]
    fn test_numeric_fraction() {
        let buf = encoded(&SqlValue::Decimal("123.45".parse().unwrap()));
        let (_, ndigits, weight, _, dscale, digits) = parse_numeric(&buf);
        assert_eq!(ndigits, 2);
        assert_eq!(weight, 0);
        assert_eq!(dscale, 2);
        assert_eq!(digits, vec![123, 4500]);
    }

    #[test]
    fn test_numeric_negative() {
        let buf = encoded(&SqlValue::Decimal("-456.78".parse().unwrap()));
        let (_, ndigits, weight, sign, dscale, digits) = parse_numeric(&buf);
        assert_eq!(ndigits, 2);
        assert_eq!(weight, 0);
        assert_eq!(sign, NUMERIC_NEG);
        assert_eq!(dscale, 2);
        assert_eq!(digits, vec![456, 7800]);
    }

    #[test]
    fn test_numeric_small_fraction() {
        // 0.01 = 100/10000, first digit group one step below the point.
        let buf = encoded(&SqlValue::Decimal("0.01".parse().unwrap()));
        let (_, ndigits, weight, _, dscale, digits) = parse_numeric(&buf);
        assert_eq!(ndigits, 1);
        assert_eq!(weight, -1);
        assert_eq!(dscale, 2);
        assert_eq!(digits, vec![100]);
    }

    #[test]
    fn test_numeric_tiny_fraction() {
        // 0.0000000001 = 100 * 10000^-3
        let buf = encoded(&SqlValue::Decimal("0.0000000001".parse().unwrap()));
        let (_, ndigits, weight, _, dscale, digits) = parse_numeric(&buf);
        assert_eq!(ndigits, 1);
        assert_eq!(weight, -3);
        assert_eq!(dscale, 10);
        assert_eq!(digits, vec![100]);
    }

    #[test]
    fn test_numeric_large_integer() {
        let buf = encoded(&SqlValue::Decimal("12345678901234".parse().unwrap()));
        let (_, ndigits, weight, _, dscale, digits) = parse_numeric(&buf);
        assert_eq!(ndigits, 4);
        assert_eq!(weight, 3);
        assert_eq!(dscale, 0);
        assert_eq!(digits, vec![12, 3456, 7890, 1234]);
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(SqlValue::from(42i32), SqlValue::I32(42));
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::from(Some(1i64)), SqlValue::I64(1));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
    }
}
