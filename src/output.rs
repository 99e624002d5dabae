//! Prediction file writers.
use std::path::Path;

use csv;
use failure;

use crate::evaluation::Prediction;

/// Significant digits of the bare prediction files.
pub const BARE_DIGITS: usize = 6;

/// Significant digits of the annotated prediction files.
pub const ANNOTATED_DIGITS: usize = 5;

fn writer<P: AsRef<Path>>(path: P) -> Result<csv::Writer<std::fs::File>, failure::Error> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)?)
}

/// Write one predicted rating per line, in order, rounded to `BARE_DIGITS`
/// significant digits.
pub fn write_predictions<P: AsRef<Path>>(
    path: P,
    predictions: &[Prediction],
) -> Result<(), failure::Error> {
    let mut writer = writer(path)?;

    for prediction in predictions {
        writer.write_record(&[format_significant(prediction.rating, BARE_DIGITS)])?;
    }

    writer.flush()?;

    Ok(())
}

/// Write `user movie time prediction` lines, with the prediction rounded to
/// `ANNOTATED_DIGITS` significant digits.
pub fn write_annotated_predictions<P: AsRef<Path>>(
    path: P,
    predictions: &[Prediction],
) -> Result<(), failure::Error> {
    let mut writer = writer(path)?;

    for prediction in predictions {
        writer.write_record(&[
            prediction.user.to_string(),
            prediction.item.to_string(),
            prediction.day.to_string(),
            format_significant(prediction.rating, ANNOTATED_DIGITS),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Render `value` with `digits` significant digits the way C's `%g` does:
/// fixed notation unless the decimal exponent is below -4 or at least
/// `digits`, trailing zeros removed.
pub fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }

    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);

    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => (mantissa, exponent),
            Err(_) => return scientific,
        },
        None => return scientific,
    };

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_owned()
    }
}
