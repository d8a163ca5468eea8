//! Time of day sentences received over the RS422 serial line.
//!
//! Each supported sentence format has its own [SentenceParser]; the RS422
//! controller picks one from the configured protocol. Sentences must carry a
//! valid `*hh` checksum (XOR of the bytes between `$` and `*`).
//!
//! The proprietary POLYT sentence has the layout
//! `$POLYT,hhmmss.ss,ddmmyy,<utc offset>,<valid A/V>*hh`.

use tracing::trace;

use crate::time::Timestamp;

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NmeaError {
    #[error("sentence does not start with '$'")]
    MissingStart,
    #[error("sentence has no checksum")]
    MissingChecksum,
    #[error("checksum mismatch: expected {expected:02X}, calculated {calculated:02X}")]
    Checksum { expected: u8, calculated: u8 },
    #[error("malformed {0} field")]
    Malformed(&'static str),
}

/// UTC time of day extracted from one sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmeaTime {
    /// year, month, day; GGA sentences have no date
    pub date: Option<(u16, u8, u8)>,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanos: u32,
    /// UTC to TAI offset when the sentence carries one
    pub utc_offset: Option<i16>,
    /// receiver reports a usable fix
    pub valid: bool,
}

impl NmeaTime {
    fn seconds_of_day(&self) -> i64 {
        self.hour as i64 * 3600 + self.minute as i64 * 60 + self.second as i64
    }

    /// PTP (TAI) time of this UTC time.
    ///
    /// Without a date the day is taken from `local`, our own PTP time close
    /// to the sentence, picking the neighbouring day when the time of day
    /// wrapped around midnight.
    pub fn to_timestamp(&self, utc_offset: i16, local: Timestamp) -> Option<Timestamp> {
        let utc_offset = self.utc_offset.unwrap_or(utc_offset) as i64;
        let seconds_of_day = self.seconds_of_day();

        let utc_seconds = match self.date {
            Some((year, month, day)) => {
                days_from_civil(year as i64, month, day)? * SECS_PER_DAY + seconds_of_day
            }
            None => {
                let local_utc = local.seconds as i64 - utc_offset;
                let local_day = local_utc.div_euclid(SECS_PER_DAY);
                let local_of_day = local_utc.rem_euclid(SECS_PER_DAY);
                let day = match seconds_of_day - local_of_day {
                    d if d > SECS_PER_DAY / 2 => local_day - 1,
                    d if d < -SECS_PER_DAY / 2 => local_day + 1,
                    _ => local_day,
                };
                day * SECS_PER_DAY + seconds_of_day
            }
        };

        let seconds = u64::try_from(utc_seconds + utc_offset).ok()?;
        Some(Timestamp::new(seconds, self.nanos))
    }
}

/// Parser for one sentence format
pub trait SentenceParser: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// `Ok(None)` for a well formed sentence of another type
    fn parse(&self, sentence: &str) -> Result<Option<NmeaTime>, NmeaError>;
}

/// `$--ZDA,hhmmss.ss,dd,mm,yyyy,zh,zm`
#[derive(Debug, Default)]
pub struct ZdaParser;

/// `$--RMC,hhmmss.ss,A,lat,N,lon,E,speed,course,ddmmyy,...`
#[derive(Debug, Default)]
pub struct RmcParser;

/// `$--GGA,hhmmss.ss,lat,N,lon,E,quality,...`
#[derive(Debug, Default)]
pub struct GgaParser;

#[derive(Debug, Default)]
pub struct PolytParser;

impl SentenceParser for ZdaParser {
    fn name(&self) -> &'static str {
        "ZDA"
    }

    fn parse(&self, sentence: &str) -> Result<Option<NmeaTime>, NmeaError> {
        let fields = split_checked(sentence)?;
        if !is_type(&fields, "ZDA") {
            return Ok(None);
        }
        if fields.len() < 5 {
            return Err(NmeaError::Malformed("ZDA"));
        }

        let (hour, minute, second, nanos) = parse_time(fields[1])?;
        let day = parse_number(fields[2], "day")?;
        let month = parse_number(fields[3], "month")?;
        let year = parse_number(fields[4], "year")?;

        Ok(Some(NmeaTime {
            date: Some((year, month, day)),
            hour,
            minute,
            second,
            nanos,
            utc_offset: None,
            valid: true,
        }))
    }
}

impl SentenceParser for RmcParser {
    fn name(&self) -> &'static str {
        "RMC"
    }

    fn parse(&self, sentence: &str) -> Result<Option<NmeaTime>, NmeaError> {
        let fields = split_checked(sentence)?;
        if !is_type(&fields, "RMC") {
            return Ok(None);
        }
        if fields.len() < 10 {
            return Err(NmeaError::Malformed("RMC"));
        }

        let (hour, minute, second, nanos) = parse_time(fields[1])?;
        Ok(Some(NmeaTime {
            date: Some(parse_date(fields[9])?),
            hour,
            minute,
            second,
            nanos,
            utc_offset: None,
            valid: fields[2] == "A",
        }))
    }
}

impl SentenceParser for GgaParser {
    fn name(&self) -> &'static str {
        "GGA"
    }

    fn parse(&self, sentence: &str) -> Result<Option<NmeaTime>, NmeaError> {
        let fields = split_checked(sentence)?;
        if !is_type(&fields, "GGA") {
            return Ok(None);
        }
        if fields.len() < 7 {
            return Err(NmeaError::Malformed("GGA"));
        }

        let (hour, minute, second, nanos) = parse_time(fields[1])?;
        let quality: u8 = fields[6].parse().unwrap_or(0);
        Ok(Some(NmeaTime {
            date: None,
            hour,
            minute,
            second,
            nanos,
            utc_offset: None,
            // 0 is no fix, 6 and above are estimated, manual or simulated
            valid: (1..=5).contains(&quality),
        }))
    }
}

impl SentenceParser for PolytParser {
    fn name(&self) -> &'static str {
        "POLYT"
    }

    fn parse(&self, sentence: &str) -> Result<Option<NmeaTime>, NmeaError> {
        let fields = split_checked(sentence)?;
        if fields[0] != "$POLYT" {
            return Ok(None);
        }
        if fields.len() < 5 {
            return Err(NmeaError::Malformed("POLYT"));
        }

        let (hour, minute, second, nanos) = parse_time(fields[1])?;
        Ok(Some(NmeaTime {
            date: Some(parse_date(fields[2])?),
            hour,
            minute,
            second,
            nanos,
            utc_offset: Some(parse_number(fields[3], "utc offset")?),
            valid: fields[4] == "A",
        }))
    }
}

pub fn checksum(data: &str) -> u8 {
    data.bytes().fold(0, |acc, b| acc ^ b)
}

fn split_checked(sentence: &str) -> Result<Vec<&str>, NmeaError> {
    let sentence = sentence.trim();
    let body = sentence.strip_prefix('$').ok_or(NmeaError::MissingStart)?;
    let (data, expected) = body.rsplit_once('*').ok_or(NmeaError::MissingChecksum)?;

    let expected =
        u8::from_str_radix(expected, 16).map_err(|_| NmeaError::Malformed("checksum"))?;
    let calculated = checksum(data);
    if expected != calculated {
        trace!(sentence, "dropping sentence with bad checksum");
        return Err(NmeaError::Checksum {
            expected,
            calculated,
        });
    }

    // keep the '$' on the first field for the type check
    Ok(sentence[..data.len() + 1].split(',').collect())
}

/// Matches `$GPxxx`, `$GNxxx` and other talkers
fn is_type(fields: &[&str], kind: &str) -> bool {
    fields[0].len() == 6 && fields[0].ends_with(kind)
}

fn parse_number<T: core::str::FromStr>(field: &str, name: &'static str) -> Result<T, NmeaError> {
    field.parse().map_err(|_| NmeaError::Malformed(name))
}

fn parse_time(field: &str) -> Result<(u8, u8, u8, u32), NmeaError> {
    let (whole, fraction) = field.split_once('.').unwrap_or((field, ""));
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NmeaError::Malformed("time"));
    }

    let hour: u8 = parse_number(&whole[0..2], "time")?;
    let minute: u8 = parse_number(&whole[2..4], "time")?;
    let second: u8 = parse_number(&whole[4..6], "time")?;
    if hour > 23 || minute > 59 || second > 60 {
        return Err(NmeaError::Malformed("time"));
    }

    let nanos = if fraction.is_empty() {
        0
    } else {
        let digits = &fraction[..fraction.len().min(9)];
        let value: u32 = parse_number(digits, "time")?;
        value * 10u32.pow(9 - digits.len() as u32)
    };

    Ok((hour, minute, second, nanos))
}

/// `ddmmyy`, years 80..99 are the previous century
fn parse_date(field: &str) -> Result<(u16, u8, u8), NmeaError> {
    if field.len() != 6 {
        return Err(NmeaError::Malformed("date"));
    }

    let day: u8 = parse_number(&field[0..2], "date")?;
    let month: u8 = parse_number(&field[2..4], "date")?;
    let year: u16 = parse_number(&field[4..6], "date")?;
    let year = if year >= 80 { 1900 + year } else { 2000 + year };
    Ok((year, month, day))
}

/// Days since 1970-01-01 of a proleptic Gregorian date
fn days_from_civil(year: i64, month: u8, day: u8) -> Option<i64> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year - era * 400;
    let month = month as i64;
    let day_of_year = (153 * (month + if month > 2 { -3 } else { 9 }) + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    Some(era * 146_097 + day_of_era - 719_468)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(data: &str) -> String {
        format!("${}*{:02X}", data, checksum(data))
    }

    #[test]
    fn civil_days() {
        assert_eq!(days_from_civil(1970, 1, 1), Some(0));
        assert_eq!(days_from_civil(2000, 3, 1), Some(11_017));
        assert_eq!(days_from_civil(2024, 2, 29), Some(19_782));
        assert_eq!(days_from_civil(2024, 13, 1), None);
    }

    #[test]
    fn zda() {
        let sentence = with_checksum("GPZDA,201530.25,04,07,2024,00,00");
        let time = ZdaParser.parse(&sentence).unwrap().unwrap();
        assert_eq!(time.date, Some((2024, 7, 4)));
        assert_eq!((time.hour, time.minute, time.second), (20, 15, 30));
        assert_eq!(time.nanos, 250_000_000);

        let stamp = time.to_timestamp(37, Timestamp::default()).unwrap();
        let expected_utc = days_from_civil(2024, 7, 4).unwrap() * SECS_PER_DAY + 20 * 3600 + 15 * 60 + 30;
        assert_eq!(stamp, Timestamp::new(expected_utc as u64 + 37, 250_000_000));

        // other sentence types are skipped, not rejected
        assert_eq!(ZdaParser.parse(&with_checksum("GPGGA,201530,,,,,1")), Ok(None));
    }

    #[test]
    fn rmc_and_validity() {
        let sentence = with_checksum("GNRMC,235959.00,V,,,,,,,311299,,,N");
        let time = RmcParser.parse(&sentence).unwrap().unwrap();
        assert_eq!(time.date, Some((1999, 12, 31)));
        assert!(!time.valid);
    }

    #[test]
    fn gga_takes_date_from_local_clock() {
        let sentence = with_checksum("GPGGA,000001.00,5230.0,N,00454.0,E,1,08,0.9,1.0,M,46.9,M,,");
        let time = GgaParser.parse(&sentence).unwrap().unwrap();
        assert!(time.valid);
        assert_eq!(time.date, None);

        // local clock still just before midnight of day 100
        let local = Timestamp::new((101 * SECS_PER_DAY - 2 + 37) as u64, 0);
        let stamp = time.to_timestamp(37, local).unwrap();
        assert_eq!(stamp.seconds, (101 * SECS_PER_DAY + 1 + 37) as u64);
    }

    #[test]
    fn polyt_carries_offset() {
        let sentence = with_checksum("POLYT,120000.00,010124,18,A");
        let time = PolytParser.parse(&sentence).unwrap().unwrap();
        assert_eq!(time.utc_offset, Some(18));
        let stamp = time.to_timestamp(37, Timestamp::default()).unwrap();
        let expected = days_from_civil(2024, 1, 1).unwrap() * SECS_PER_DAY + 12 * 3600 + 18;
        assert_eq!(stamp.seconds, expected as u64);
    }

    #[test]
    fn bad_sentences() {
        assert_eq!(
            ZdaParser.parse("GPZDA,201530,04,07,2024*00"),
            Err(NmeaError::MissingStart)
        );
        assert_eq!(
            ZdaParser.parse("$GPZDA,201530,04,07,2024"),
            Err(NmeaError::MissingChecksum)
        );
        assert!(matches!(
            ZdaParser.parse("$GPZDA,201530,04,07,2024*00"),
            Err(NmeaError::Checksum { .. })
        ));
        assert_eq!(
            ZdaParser.parse(&with_checksum("GPZDA,2015,04,07,2024")),
            Err(NmeaError::Malformed("time"))
        );
    }
}
