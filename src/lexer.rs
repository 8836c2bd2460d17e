use crate::error::CryptError;

/// A modular-crypt-format string (`$ident$field$field...`) split into its parts. Fields may
/// be empty; handlers decide how many they expect.
#[derive(Debug, PartialEq, Eq)]
pub struct TokenizedHash<'a> {
    pub ident: &'a str,
    pub fields: Vec<&'a str>,
}

impl<'a> TokenizedHash<'a> {
    pub fn tokenize(handler: &str, s: &'a str) -> Result<Self, CryptError> {
        enum HashStates {
            Start,
            IdentStart,
            Ident,
            Field,
        }

        let mut state = HashStates::Start;

        let mut ident = 0..0;
        let mut field = 0..0;
        let mut fields = Vec::with_capacity(4);

        for (i, c) in s.char_indices() {
            match state {
                HashStates::Start => {
                    state = match c {
                        '$' => HashStates::IdentStart,
                        _ => return Err(CryptError::malformed(handler, "must begin with '$'")),
                    };
                }

                HashStates::IdentStart => {
                    if !(c.is_ascii_alphanumeric() || c == '-') {
                        return Err(CryptError::malformed(handler, "missing identifier"));
                    }

                    ident = i..(i + 1);
                    state = HashStates::Ident;
                }

                HashStates::Ident => {
                    if c == '$' {
                        field = (i + 1)..(i + 1);
                        state = HashStates::Field;
                    } else if c.is_ascii_alphanumeric() || c == '-' {
                        ident.end += 1;
                    } else {
                        return Err(CryptError::malformed(handler, "invalid identifier"));
                    }
                }

                HashStates::Field => {
                    if c == '$' {
                        fields.push(&s[field.clone()]);
                        field = (i + 1)..(i + 1);
                    } else {
                        field.end += c.len_utf8();
                    }
                }
            }
        }

        match state {
            HashStates::Field => fields.push(&s[field]),
            HashStates::Ident => (),
            _ => return Err(CryptError::malformed(handler, "hash is incomplete")),
        }

        Ok(Self {
            ident: &s[ident],
            fields,
        })
    }

    /// Fails unless the hash has exactly `count` fields after the identifier
    pub fn expect_fields(&self, handler: &str, count: usize) -> Result<(), CryptError> {
        if self.fields.len() < count {
            return Err(CryptError::malformed(handler, "not enough '$' separated fields"));
        }

        if self.fields.len() > count {
            return Err(CryptError::malformed(handler, "too many '$' separated fields"));
        }

        Ok(())
    }
}

/// Parses a decimal cost field. Zero-padded values are rejected so that every accepted hash
/// renders back to the same string.
pub fn parse_decimal(handler: &str, field: &str, what: &'static str) -> Result<u32, CryptError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptError::MalformedHash(format!(
            "{}: {} is not a decimal number",
            handler, what
        )));
    }

    if field.len() > 1 && field.starts_with('0') {
        return Err(CryptError::MalformedHash(format!(
            "{}: {} is zero-padded",
            handler, what
        )));
    }

    match field.parse() {
        Ok(v) => Ok(v),
        Err(_) => Err(CryptError::MalformedHash(format!(
            "{}: {} is out of range",
            handler, what
        ))),
    }
}

/// Parses a decimal field that must be exactly `width` digits wide (bcrypt's `04`)
pub fn parse_fixed_width(
    handler: &str,
    field: &str,
    width: usize,
    what: &'static str,
) -> Result<u32, CryptError> {
    if field.len() != width || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptError::MalformedHash(format!(
            "{}: {} must be {} decimal digits",
            handler, what, width
        )));
    }

    match field.parse() {
        Ok(v) => Ok(v),
        Err(_) => Err(CryptError::MalformedHash(format!(
            "{}: {} is out of range",
            handler, what
        ))),
    }
}
