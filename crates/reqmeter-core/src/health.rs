//! Binary dependency health.

/// Up/down signal recorded into the dependency gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Up,
    Down,
}

impl Health {
    pub fn is_up(self) -> bool {
        matches!(self, Health::Up)
    }

    /// Gauge value: 1 for up, 0 for down.
    pub fn as_gauge(self) -> i64 {
        match self {
            Health::Up => 1,
            Health::Down => 0,
        }
    }
}

impl From<bool> for Health {
    fn from(up: bool) -> Self {
        if up {
            Health::Up
        } else {
            Health::Down
        }
    }
}

macro_rules! health_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Health {
                fn from(v: $t) -> Self {
                    Health::from(v != 0)
                }
            }
        )*
    };
}

health_from_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
