//! 积分金额
//!
//! 内部以"分"（百分之一积分）为单位的整数存储，避免浮点累计误差；
//! JSON 对外表现为十进制数字，例如 `729.98`。

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 积分金额（单位：分）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// 从十进制积分值转换，四舍五入到分
    ///
    /// NaN、无穷大或超出 i64 范围时返回 None
    pub fn from_points(points: f64) -> Option<Self> {
        if !points.is_finite() {
            return None;
        }
        let minor = (points * 100.0).round();
        if minor < i64::MIN as f64 || minor > i64::MAX as f64 {
            return None;
        }
        Some(Self(minor as i64))
    }

    pub fn to_points(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_points())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let points = f64::deserialize(deserializer)?;
        Amount::from_points(points)
            .ok_or_else(|| serde::de::Error::custom(format!("积分金额超出范围: {points}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_rounds_to_hundredths() {
        assert_eq!(Amount::from_points(729.98), Some(Amount::from_minor(72_998)));
        assert_eq!(Amount::from_points(500.0), Some(Amount::from_minor(50_000)));
        assert_eq!(Amount::from_points(0.019), Some(Amount::from_minor(2)));
        assert_eq!(Amount::from_points(f64::NAN), None);
        assert_eq!(Amount::from_points(f64::INFINITY), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_minor(72_998).to_string(), "729.98");
        assert_eq!(Amount::from_minor(5).to_string(), "0.05");
        assert_eq!(Amount::from_minor(-150).to_string(), "-1.50");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_json_is_decimal_number() {
        let json = serde_json::to_string(&Amount::from_minor(50_000)).unwrap();
        assert_eq!(json, "500.0");
        let parsed: Amount = serde_json::from_str("751").unwrap();
        assert_eq!(parsed, Amount::from_minor(75_100));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::from_minor(300);
        assert_eq!(a.checked_sub(Amount::from_minor(500)), Some(Amount::from_minor(-200)));
        assert_eq!(Amount::from_minor(i64::MAX).checked_add(a), None);
        assert!(a.is_positive());
        assert!(!Amount::ZERO.is_positive());
    }
}
