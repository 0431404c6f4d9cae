// src/recipe/interpolate.rs

//! Variable interpolation for install step arguments
//!
//! Arguments may reference variables as `$NAME` or `${NAME}`. A name is a
//! letter or underscore followed by letters, digits or underscores, so
//! `$ARCH-softmmu` reads `ARCH`. `$$` produces a literal dollar sign, and a
//! `$` not followed by a name is kept as is.

use std::collections::BTreeMap;

/// Variables every build provides
pub const BUILTIN_VARIABLES: &[&str] = &[
    "PREFIX",
    "CC",
    "ARCH",
    "JOBS",
    "NAME",
    "VERSION",
    "SOURCE_DIR",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Dollar,
    Var(&'a str),
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn tokenize(template: &str) -> Result<Vec<Piece<'_>>, String> {
    let bytes = template.as_bytes();
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (piece, end) = match next {
            Some(b'$') => (Piece::Dollar, i + 2),
            Some(b'{') => {
                let close = template[i + 2..]
                    .find('}')
                    .map(|offset| i + 2 + offset)
                    .ok_or_else(|| format!("unterminated '${{' in '{}'", template))?;
                let name = &template[i + 2..close];
                let valid = !name.is_empty()
                    && is_name_start(name.as_bytes()[0])
                    && name.bytes().all(is_name_char);
                if !valid {
                    return Err(format!("invalid variable name '{}' in '{}'", name, template));
                }
                (Piece::Var(name), close + 1)
            }
            Some(c) if is_name_start(c) => {
                let mut end = i + 1;
                while end < bytes.len() && is_name_char(bytes[end]) {
                    end += 1;
                }
                (Piece::Var(&template[i + 1..end]), end)
            }
            _ => {
                i += 1;
                continue;
            }
        };

        if literal_start < i {
            pieces.push(Piece::Text(&template[literal_start..i]));
        }
        pieces.push(piece);
        i = end;
        literal_start = end;
    }

    if literal_start < bytes.len() {
        pieces.push(Piece::Text(&template[literal_start..]));
    }

    Ok(pieces)
}

/// List the variable names referenced by a template, in order of appearance
pub fn referenced_variables(template: &str) -> Result<Vec<String>, String> {
    Ok(tokenize(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Var(name) => Some(name.to_string()),
            _ => None,
        })
        .collect())
}

/// Substitute variables into a template
///
/// Fails on the first variable with no value.
pub fn interpolate(template: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());

    for piece in tokenize(template)? {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Dollar => out.push('$'),
            Piece::Var(name) => {
                let value = vars
                    .get(name)
                    .ok_or_else(|| format!("undefined variable '{}'", name))?;
                out.push_str(value);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        [
            ("PREFIX", "/opt/sous"),
            ("ARCH", "aarch64"),
            ("CC", "clang"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_plain_and_braced() {
        assert_eq!(
            interpolate("--prefix=$PREFIX", &vars()).unwrap(),
            "--prefix=/opt/sous"
        );
        assert_eq!(
            interpolate("--target-list=${ARCH}-softmmu", &vars()).unwrap(),
            "--target-list=aarch64-softmmu"
        );
    }

    #[test]
    fn test_name_stops_at_dash() {
        assert_eq!(
            interpolate("--target-list=$ARCH-softmmu", &vars()).unwrap(),
            "--target-list=aarch64-softmmu"
        );
    }

    #[test]
    fn test_literal_dollars() {
        assert_eq!(interpolate("cost: $$5", &vars()).unwrap(), "cost: $5");
        assert_eq!(interpolate("trailing $", &vars()).unwrap(), "trailing $");
        assert_eq!(interpolate("$ 1", &vars()).unwrap(), "$ 1");
        assert_eq!(interpolate("V=1", &vars()).unwrap(), "V=1");
    }

    #[test]
    fn test_undefined_variable() {
        let err = interpolate("--with=$NOPE", &vars()).unwrap_err();
        assert!(err.contains("NOPE"));
    }

    #[test]
    fn test_referenced_variables() {
        assert_eq!(
            referenced_variables("--cc=$CC --host-cc=${CC} $$HOME $PREFIX/bin").unwrap(),
            vec!["CC", "CC", "PREFIX"]
        );
    }

    #[test]
    fn test_malformed_braces() {
        assert!(referenced_variables("${PREFIX").is_err());
        assert!(referenced_variables("${}").is_err());
        assert!(referenced_variables("${1X}").is_err());
    }
}
