use once_cell::sync::Lazy;
use regex::Regex;

/// RFC 5322 mailbox: an `addr-spec` (dot-atom or quoted local part, dot-atom
/// domain), bare or wrapped in a display name of atoms and quoted strings,
/// with optional comments around it. Dotless domains such as `localhost`
/// are accepted.
static EMAIL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    let atom = r"[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+";
    let quoted = r#""(?:[^"\\\r\n]|\\.)*""#;
    let comment = r"\((?:[^()\\]|\\.)*\)";
    let cfws = format!(r"(?:\s*{comment})*\s*");
    let dot_atom = format!(r"{atom}(?:\.{atom})*");
    let addr_spec = format!("(?:{dot_atom}|{quoted})@{dot_atom}");
    let display_name = format!(r#"(?:[^<>@"()]|{quoted}|{comment})*"#);
    Regex::new(&format!(
        "^{cfws}(?:{addr_spec}|{display_name}<{cfws}{addr_spec}{cfws}>){cfws}$"
    ))
    .expect("email pattern is a valid regex")
});

/// How a login identifier is sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginIdentifier<'a> {
    Email(&'a str),
    Username(&'a str),
}

impl<'a> LoginIdentifier<'a> {
    /// Anything that parses as an email address is an email, everything
    /// else a username.
    #[must_use]
    pub fn classify(value: &'a str) -> Self {
        if EMAIL_ADDRESS.is_match(value.trim()) {
            Self::Email(value)
        } else {
            Self::Username(value)
        }
    }

    pub(crate) const fn email(self) -> Option<&'a str> {
        match self {
            Self::Email(value) => Some(value),
            Self::Username(_) => None,
        }
    }

    pub(crate) const fn username(self) -> Option<&'a str> {
        match self {
            Self::Username(value) => Some(value),
            Self::Email(_) => None,
        }
    }
}
