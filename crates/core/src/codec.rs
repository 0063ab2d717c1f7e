//! Big-endian primitives shared by every payload in the workspace.
//!
//! Strings are a `u16` byte length followed by UTF-8 bytes, booleans are a
//! single byte and collection sizes are `i32`. Every getter checks the
//! remaining length first so a short buffer turns into
//! [`CoreError::Truncated`] instead of a panic.

use bytes::{Buf, BufMut};
use chrono::{Datelike, NaiveDate};

use crate::{CoreError, Result};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CoreError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn put_utf<B: BufMut>(buf: &mut B, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| CoreError::StringTooLong { len: value.len() })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn put_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Writes a collection size as `i32`.
pub fn put_len<B: BufMut>(buf: &mut B, len: usize) -> Result<()> {
    let len = i32::try_from(len).map_err(|_| CoreError::LengthOverflow(len))?;
    buf.put_i32(len);
    Ok(())
}

pub fn get_utf<B: Buf>(buf: &mut B) -> Result<String> {
    ensure(buf, 2)?;
    let len = buf.get_u16() as usize;
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::InvalidUtf8)
}

pub fn get_bool<B: Buf>(buf: &mut B) -> Result<bool> {
    ensure(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

pub fn get_i16<B: Buf>(buf: &mut B) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn get_i32<B: Buf>(buf: &mut B) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_i64<B: Buf>(buf: &mut B) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn get_f64<B: Buf>(buf: &mut B) -> Result<f64> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

/// Reads an `i32` collection size, rejecting negative values.
pub fn get_len<B: Buf>(buf: &mut B) -> Result<usize> {
    let len = get_i32(buf)?;
    usize::try_from(len).map_err(|_| CoreError::NegativeLength(len))
}

/// Days since 1970-01-01.
pub fn epoch_day(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn date_from_epoch_day(day: i64) -> Result<NaiveDate> {
    day.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(|ce| i32::try_from(ce).ok())
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or(CoreError::InvalidEpochDay(day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn epoch_day_matches_calendar() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(epoch_day(epoch), 0);

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(epoch_day(date), 19_783);
        assert_eq!(date_from_epoch_day(19_783).unwrap(), date);
        assert_eq!(
            date_from_epoch_day(-1).unwrap(),
            NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()
        );
    }

    #[test]
    fn absurd_epoch_day_is_rejected() {
        assert_eq!(
            date_from_epoch_day(i64::MAX),
            Err(CoreError::InvalidEpochDay(i64::MAX))
        );
    }

    #[test]
    fn utf_uses_u16_prefix() {
        let mut buf = BytesMut::new();
        put_utf(&mut buf, "café").unwrap();
        assert_eq!(&buf[..2], &[0, 5]);

        let mut read = &buf[..];
        assert_eq!(get_utf(&mut read).unwrap(), "café");
        assert!(read.is_empty());
    }

    #[test]
    fn oversized_string_is_rejected() {
        let long = "x".repeat(70_000);
        let mut buf = BytesMut::new();
        assert_eq!(
            put_utf(&mut buf, &long),
            Err(CoreError::StringTooLong { len: 70_000 })
        );
    }

    #[test]
    fn short_buffers_report_truncation() {
        let mut read: &[u8] = &[0, 10, b'a'];
        assert_eq!(
            get_utf(&mut read),
            Err(CoreError::Truncated { needed: 10, remaining: 1 })
        );

        let mut read: &[u8] = &[0, 0];
        assert!(matches!(get_i64(&mut read), Err(CoreError::Truncated { .. })));
    }

    #[test]
    fn negative_lengths_are_rejected() {
        let mut read: &[u8] = &(-3i32).to_be_bytes();
        assert_eq!(get_len(&mut read), Err(CoreError::NegativeLength(-3)));
    }
}
