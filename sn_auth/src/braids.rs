use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(self.as_str(), &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(self.as_str(), &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

pub(crate) fn limited_reveal(
    unprotected: &str,
    f: &mut fmt::Formatter,
    default_len: usize,
) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The name a user logs in with
#[braid(serde)]
pub struct Username;

/// A user's password
///
/// Neither `Debug` nor `Display` reveal the password unless the alternate
/// flag is given.
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_hidden_by_default() {
        let password = Password::from_static("hunter2");

        assert_eq!(format!("{:?}", password), "***PASSWORD***");
        assert_eq!(format!("{}", password), "***PASSWORD***");
    }

    #[test]
    fn alternate_debug_reveals_nothing_by_default() {
        let password = Password::from_static("hunter2");

        assert_eq!(format!("{:#?}", password), "\"…\"");
    }

    #[test]
    fn alternate_display_reveals_the_password() {
        let password = Password::from_static("hunter2");

        assert_eq!(format!("{:#}", password), "hunter2");
    }

    #[test]
    fn width_limits_the_revealed_prefix() {
        let password = Password::from_static("hunter2");

        assert_eq!(format!("{:#4?}", password), "\"hun…\"");
    }
}
