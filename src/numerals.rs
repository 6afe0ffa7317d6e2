// Arabic-Indic numeral normalization
// Pure character translation, no state, safe on mixed-language text

/// Convert Arabic-Indic numerals to Western (Latin) numerals.
///
/// Replaces the digits ٠-٩ (U+0660..U+0669) with 0-9 and the Arabic
/// decimal/thousands separators (U+066B / U+066C) with `.` / `,`.
/// Every other character, including Latin letters and Arabic prose,
/// passes through unchanged. Applying the function twice equals
/// applying it once.
///
/// # Examples
/// ```
/// use sms_ledger::numerals::normalize_numerals;
///
/// assert_eq!(normalize_numerals("١٢٣"), "123");
/// assert_eq!(normalize_numerals("١٬٢٣٤٫٥٦"), "1,234.56");
/// assert_eq!(normalize_numerals("مبلغ ١٥٠٫٥٠ جنيه"), "مبلغ 150.50 جنيه");
/// ```
pub fn normalize_numerals(text: &str) -> String {
    text.chars().map(translate).collect()
}

fn translate(c: char) -> char {
    match c {
        '٠' => '0', // U+0660
        '١' => '1', // U+0661
        '٢' => '2', // U+0662
        '٣' => '3', // U+0663
        '٤' => '4', // U+0664
        '٥' => '5', // U+0665
        '٦' => '6', // U+0666
        '٧' => '7', // U+0667
        '٨' => '8', // U+0668
        '٩' => '9', // U+0669
        '٫' => '.', // U+066B - Arabic decimal separator
        '٬' => ',', // U+066C - Arabic thousands separator
        other => other,
    }
}

// ============================================================================
// TESTS
// ============================================================================
