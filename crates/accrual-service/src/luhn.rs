//! Luhn 校验
//!
//! 订单号与提现单号的格式过滤：非空十进制数字串，且满足 mod 10 校验。
//! 从最右侧的校验位往左数，校验位本身不翻倍，其左侧每隔一位翻倍，
//! 翻倍结果大于 9 时减 9，全部数位求和后能被 10 整除即合法。

/// 规范化订单号
///
/// 请求体常带尾随换行，这里只去掉首尾空白；返回 None 表示不是纯数字串
pub fn normalize(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(trimmed)
}

/// 计算 Luhn 校验和（mod 10 之前的数位和）
///
/// 非数字字符返回 None
fn digit_sum(digits: &str, double_rightmost: bool) -> Option<u32> {
    let mut sum = 0u32;
    for (pos, ch) in digits.chars().rev().enumerate() {
        let mut d = ch.to_digit(10)?;
        let doubled = (pos % 2 == 1) != double_rightmost;
        if doubled {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    Some(sum)
}

/// 判断号码是否通过 Luhn 校验
pub fn is_valid(number: &str) -> bool {
    match normalize(number) {
        Some(digits) => digit_sum(digits, false).is_some_and(|sum| sum % 10 == 0),
        None => false,
    }
}

/// 为一串数字计算应追加的校验位
pub fn check_digit(payload: &str) -> Option<u8> {
    if payload.is_empty() {
        return None;
    }
    // 追加校验位后原有数位整体左移一位，因此最右一位需要翻倍
    let sum = digit_sum(payload, true)?;
    Some(((10 - sum % 10) % 10) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_numbers() {
        assert!(is_valid("79927398713"));
        assert!(!is_valid("79927398710"));
        assert!(is_valid("12345678903"));
        assert!(is_valid("0"));
        assert!(!is_valid("12345678901"));
    }

    #[test]
    fn test_rejects_non_digits() {
        assert!(!is_valid(""));
        assert!(!is_valid("   "));
        assert!(!is_valid("1234-5678"));
        assert!(!is_valid("abc"));
        assert!(!is_valid("-79927398713"));
    }

    #[test]
    fn test_trailing_newline_is_tolerated() {
        assert_eq!(normalize("12345678903\n"), Some("12345678903"));
        assert!(is_valid("  79927398713\r\n"));
    }

    #[test]
    fn test_check_digit_roundtrip() {
        for payload in ["7992739871", "1234567890", "4561261212345467", "9"] {
            let digit = check_digit(payload).unwrap();
            let number = format!("{payload}{digit}");
            assert!(is_valid(&number), "{number} should be valid");

            // 其他校验位都应失败
            for other in (0..10u8).filter(|d| *d != digit) {
                assert!(!is_valid(&format!("{payload}{other}")));
            }
        }
        assert_eq!(check_digit("7992739871"), Some(3));
        assert_eq!(check_digit(""), None);
    }

    #[test]
    fn test_long_numbers_do_not_overflow() {
        let payload = "9".repeat(4096);
        let digit = check_digit(&payload).unwrap();
        assert!(is_valid(&format!("{payload}{digit}")));
    }
}
