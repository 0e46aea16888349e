//! Type-encoding helpers: map a pointer type encoding to the identifier the
//! pointer registry is keyed by.
//!
//! Only pointers to named structs or unions are eligible for wrapping:
//! `^{__CFString=}` → `__CFString`, `r^{_NSZone=}` → `_NSZone`. Pointers to
//! scalars, `void`, other pointers or anonymous aggregates are not.

/// Method-argument qualifiers that may precede an encoding.
const QUALIFIERS: &[u8] = b"rnNoORV";

const POINTER: char = '^';

/// Strip leading qualifiers (`r`, `n`, `o`, ...).
pub fn skip_qualifiers(signature: &str) -> &str {
    signature.trim_start_matches(|c: char| c.is_ascii() && QUALIFIERS.contains(&(c as u8)))
}

/// Registry identifier for a pointer encoding, or `None` if the encoding is
/// not a pointer to a named struct or union.
pub fn pointer_type_identifier(signature: &str) -> Option<&str> {
    let pointee = skip_qualifiers(signature).strip_prefix(POINTER)?;
    let close = match pointee.chars().next()? {
        '{' => '}',
        '(' => ')',
        _ => return None,
    };
    let body = &pointee[1..];
    let end = body.find(|c: char| c == '=' || c == close)?;
    let name = &body[..end];
    if name.is_empty() || name == "?" {
        return None;
    }
    Some(name)
}

/// Canonical encoding of a pointer to the opaque struct `identifier`.
pub fn pointer_encoding(identifier: &str) -> String {
    format!("^{{{identifier}=}}")
}

/// Display name conventionally used for a CF-style handle identifier:
/// `__CFString` → `CFStringRef`.
pub fn cf_display_name(identifier: &str) -> String {
    format!("{}Ref", identifier.trim_start_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_pointers_are_eligible() {
        assert_eq!(pointer_type_identifier("^{__CFString=}"), Some("__CFString"));
        assert_eq!(pointer_type_identifier("^{_NSZone=}16"), Some("_NSZone"));
        assert_eq!(pointer_type_identifier("^{CGPoint=dd}"), Some("CGPoint"));
        assert_eq!(pointer_type_identifier("^{__CFRunLoop}"), Some("__CFRunLoop"));
        assert_eq!(pointer_type_identifier("^(Value=iq)"), Some("Value"));
    }

    #[test]
    fn qualifiers_are_skipped() {
        assert_eq!(pointer_type_identifier("r^{_NSZone=}"), Some("_NSZone"));
        assert_eq!(pointer_type_identifier("nO^{_object=}"), Some("_object"));
    }

    #[test]
    fn other_encodings_are_not_eligible() {
        for sig in ["", "^", "^v", "^i", "^^{_NSZone=}", "{_NSZone=}", "^{?=ii}", "^{=}", "^{broken", "@"] {
            assert_eq!(pointer_type_identifier(sig), None, "{sig:?}");
        }
    }

    #[test]
    fn encoding_and_identifier_agree() {
        let sig = pointer_encoding("__CFAllocator");
        assert_eq!(sig, "^{__CFAllocator=}");
        assert_eq!(pointer_type_identifier(&sig), Some("__CFAllocator"));
    }

    #[test]
    fn cf_names() {
        assert_eq!(cf_display_name("__CFString"), "CFStringRef");
        assert_eq!(cf_display_name("CGColor"), "CGColorRef");
    }
}
