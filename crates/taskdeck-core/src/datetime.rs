use chrono::{
  Datelike,
  Duration,
  Local,
  NaiveDate,
  Weekday
};

use crate::error::{
  AppError,
  AppResult
};

/// Today's calendar date on this
/// machine; due dates carry no zone.
pub fn local_today() -> NaiveDate {
  Local::now().date_naive()
}

/// Parses a due-date expression.
/// `none` (or blank) clears the date.
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> AppResult<Option<NaiveDate>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" | "none" | "never" => {
      return Ok(None);
    }
    | "today" => return Ok(Some(today)),
    | "tomorrow" => {
      return Ok(Some(
        today + Duration::days(1)
      ));
    }
    | "yesterday" => {
      return Ok(Some(
        today - Duration::days(1)
      ));
    }
    | _ => {}
  }

  if let Some(date) =
    parse_relative(&lower, today)
  {
    return Ok(Some(date));
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(Some(next_weekday_date(
      today, weekday
    )));
  }

  for format in ["%Y-%m-%d", "%Y/%m/%d"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, format
      )
    {
      return Ok(Some(date));
    }
  }

  Err(AppError::Validation(format!(
    "unrecognized due date: {token} \
     (try YYYY-MM-DD, today, \
     tomorrow, +3d, friday or none)"
  )))
}

/// `+Nd` / `+Nw`, days or weeks ahead.
fn parse_relative(
  token: &str,
  today: NaiveDate
) -> Option<NaiveDate> {
  let rest = token.strip_prefix('+')?;
  if !rest.is_ascii() {
    return None;
  }
  let (count, unit) =
    rest.split_at(rest.len().checked_sub(1)?);
  let count: i64 = count.parse().ok()?;
  let days = match unit {
    | "d" => count,
    | "w" => count.checked_mul(7)?,
    | _ => return None
  };
  today.checked_add_signed(
    Duration::try_days(days)?
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

/// Next occurrence strictly after
/// `from`.
fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::parse_due_date;

  fn today() -> NaiveDate {
    // a Tuesday
    NaiveDate::from_ymd_opt(2026, 2, 17)
      .expect("valid date")
  }

  fn parse(input: &str) -> String {
    parse_due_date(input, today())
      .expect("parse")
      .map(|d| {
        d.format("%Y-%m-%d").to_string()
      })
      .unwrap_or_else(|| {
        "none".to_string()
      })
  }

  #[test]
  fn parses_named_days() {
    assert_eq!(parse("today"), "2026-02-17");
    assert_eq!(
      parse("Tomorrow"),
      "2026-02-18"
    );
    assert_eq!(parse("none"), "none");
  }

  #[test]
  fn parses_weekday_name() {
    assert_eq!(
      parse("wednesday"),
      "2026-02-18"
    );
    assert_eq!(parse("tue"), "2026-02-24");
  }

  #[test]
  fn parses_relative_offsets() {
    assert_eq!(parse("+3d"), "2026-02-20");
    assert_eq!(parse("+2w"), "2026-03-03");
  }

  #[test]
  fn parses_iso_dates_and_rejects_noise()
  {
    assert_eq!(
      parse("2026-12-31"),
      "2026-12-31"
    );
    assert!(
      parse_due_date("soonish", today())
        .is_err()
    );
    assert!(
      parse_due_date("2026-02-30", today())
        .is_err()
    );
  }
}
