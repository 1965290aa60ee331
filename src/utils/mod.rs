//! Utility functions for formatting and common operations
//!
//! Centralized formatting for currency, percentages and signed changes so
//! tables and summaries render values the same way.

use rust_decimal::Decimal;

/// Currency symbol options for formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySymbol {
    /// Include "$" prefix
    USD,
    /// No currency symbol (for table cells that already carry a header)
    None,
}

/// Core formatting function with full control over output.
///
/// Rounds to cents and groups thousands with `,`:
///
/// ```
/// use folio::utils::{format_currency_with_width, CurrencySymbol};
/// use rust_decimal_macros::dec;
///
/// assert_eq!(
///     format_currency_with_width(dec!(1234.56), 0, CurrencySymbol::USD),
///     "$1,234.56"
/// );
/// assert_eq!(
///     format_currency_with_width(dec!(1234), 12, CurrencySymbol::None),
///     "    1,234.00"
/// );
/// ```
pub fn format_currency_with_width(value: Decimal, width: usize, symbol: CurrencySymbol) -> String {
    let rounded = value.round_dp(2);
    let is_negative = rounded < Decimal::ZERO;

    let formatted = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(integer_part.len() + integer_part.len() / 3);
    for (i, c) in integer_part.chars().enumerate() {
        if i > 0 && (integer_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if is_negative { "-" } else { "" };
    let prefix = match symbol {
        CurrencySymbol::USD => "$",
        CurrencySymbol::None => "",
    };

    let result = format!("{}{}{}.{}", sign, prefix, grouped, decimal_part);

    if width > 0 && result.len() < width {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

/// Format as dollars: "$1,234.56"
pub fn format_currency(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::USD)
}

/// Format a gain or loss with an explicit sign: "+$12.00", "-$3.50"
pub fn format_signed_currency(value: Decimal) -> String {
    if value > Decimal::ZERO {
        format!("+{}", format_currency(value))
    } else {
        format_currency(value)
    }
}

/// Format a percentage with two decimals: "12.35%"
pub fn format_percent(value: Decimal) -> String {
    format!("{:.2}%", value.round_dp(2))
}

/// Format a percentage change with an explicit sign: "+1.25%"
pub fn format_signed_percent(value: Decimal) -> String {
    if value > Decimal::ZERO {
        format!("+{}", format_percent(value))
    } else {
        format_percent(value)
    }
}

/// Format a large dollar amount in compact form: "$2.50T", "$61.00B"
pub fn format_compact(value: Decimal) -> String {
    let trillion = Decimal::from(1_000_000_000_000u64);
    let billion = Decimal::from(1_000_000_000u64);
    let million = Decimal::from(1_000_000u64);

    let abs = value.abs();
    if abs >= trillion {
        format!("${:.2}T", (value / trillion).round_dp(2))
    } else if abs >= billion {
        format!("${:.2}B", (value / billion).round_dp(2))
    } else if abs >= million {
        format!("${:.2}M", (value / million).round_dp(2))
    } else {
        format_currency(value)
    }
}
