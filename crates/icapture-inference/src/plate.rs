/// 清洗 OCR 文本
///
/// 转大写，只保留 `A-Z`、`0-9` 和 `-`。形如 `LLL-DDDD` 的号牌，
/// 数字段中常见的误识别字母会被纠正。清洗后为空返回 `None`。
pub fn normalize_plate(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        return None;
    }

    let mut chars: Vec<char> = cleaned.chars().collect();
    if chars.len() >= 6 && chars[..3].iter().all(|c| c.is_ascii_uppercase()) {
        let digits_from = if chars[3] == '-' { 4 } else { 3 };
        let digit_len = chars.len() - digits_from;
        if (3..=4).contains(&digit_len) {
            for c in &mut chars[digits_from..] {
                *c = fix_digit(*c);
            }
        }
    }

    Some(chars.into_iter().collect())
}

fn fix_digit(c: char) -> char {
    match c {
        'O' => '0',
        'I' | 'L' => '1',
        'S' => '5',
        'Z' => '2',
        'B' => '8',
        other => other,
    }
}

/// 号牌格式：三个字母，可选连字符，三到四位数字
pub fn is_valid_plate(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() < 6 || !bytes[..3].iter().all(u8::is_ascii_uppercase) {
        return false;
    }

    let digits = match bytes[3] {
        b'-' => &bytes[4..],
        _ => &bytes[3..],
    };
    (3..=4).contains(&digits.len()) && digits.iter().all(u8::is_ascii_digit)
}

/// 百分比形式的置信度换算到 0..1
pub fn normalize_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        return 0.0;
    }
    let value = if confidence > 1.0 {
        confidence / 100.0
    } else {
        confidence
    };
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate(" abc 1234 ").as_deref(), Some("ABC1234"));
        assert_eq!(normalize_plate("ABC-12O4").as_deref(), Some("ABC-1204"));
        assert_eq!(normalize_plate("NBS-IZ5B").as_deref(), Some("NBS-1258"));
        assert_eq!(normalize_plate("-xy.z-").as_deref(), Some("XYZ"));
        assert_eq!(normalize_plate("***"), None);
    }

    #[test]
    fn test_letter_prefix_is_untouched() {
        // 前三位的字母不做数字纠正
        assert_eq!(normalize_plate("SOB123").as_deref(), Some("SOB123"));
    }

    #[test]
    fn test_plate_format() {
        assert!(is_valid_plate("ABC1234"));
        assert!(is_valid_plate("ABC-123"));
        assert!(!is_valid_plate("AB1234"));
        assert!(!is_valid_plate("ABC12"));
        assert!(!is_valid_plate("ABC-12345"));
        assert!(!is_valid_plate("ABC--123"));
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.85), 0.85);
        assert!((normalize_confidence(92.0) - 0.92).abs() < 1e-6);
        assert_eq!(normalize_confidence(-0.1), 0.0);
        assert_eq!(normalize_confidence(f32::NAN), 0.0);
    }
}
