//! Bounded JSON object decoder.
//!
//! Only what the protocol needs is materialized: the members of one object,
//! with strings borrowed from the line (escape sequences stay raw) and nested
//! objects kept as raw slices so `parameters` can be decoded on demand. Arrays
//! are validated and then reduced to a marker. Nesting depth is capped so a
//! hostile line cannot exhaust the stack.

use heapless::Vec;
use winnow::ModalResult;
use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, cut_err, delimited, fail, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_till, take_while};

use super::ProtocolError;

/// Members kept per object.
pub const MAX_FIELDS: usize = 16;

/// Deepest nesting accepted below the top-level object.
pub const MAX_DEPTH: u8 = 4;

/// One decoded JSON value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum JsonValue<'a> {
    Null,
    Bool(bool),
    Number(f64),
    /// String contents without the quotes, escapes untouched.
    Str(&'a str),
    /// Raw text of a nested object, braces included.
    Object(&'a str),
    Array,
}

impl<'a> JsonValue<'a> {
    #[must_use]
    pub const fn as_str(&self) -> Option<&'a str> {
        match self {
            JsonValue::Str(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            JsonValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

/// One `"key": value` member.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Field<'a> {
    pub key: &'a str,
    pub value: JsonValue<'a>,
}

/// Members of a decoded object in wire order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message<'a> {
    fields: Vec<Field<'a>, MAX_FIELDS>,
}

impl<'a> Message<'a> {
    /// Looks up a member; when a key repeats, the last occurrence wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<JsonValue<'a>> {
        self.fields
            .iter()
            .rev()
            .find(|field| field.key == key)
            .map(|field| field.value)
    }

    #[must_use]
    pub fn fields(&self) -> &[Field<'a>] {
        &self.fields
    }
}

/// Decodes `text` as exactly one JSON object, surrounding whitespace allowed.
///
/// # Errors
///
/// [`ProtocolError::Malformed`] for anything that is not a single object and
/// [`ProtocolError::TooManyFields`] when it has more than [`MAX_FIELDS`] members.
pub fn parse_message(text: &str) -> Result<Message<'_>, ProtocolError> {
    let mut message = Message::default();
    let mut overflow = false;
    let mut input = text;

    let parsed = top_level(&mut input, &mut message.fields, &mut overflow);

    if overflow {
        return Err(ProtocolError::TooManyFields);
    }
    match parsed {
        Ok(()) if input.is_empty() => Ok(message),
        _ => Err(ProtocolError::Malformed),
    }
}

fn top_level<'a>(
    input: &mut &'a str,
    fields: &mut Vec<Field<'a>, MAX_FIELDS>,
    overflow: &mut bool,
) -> ModalResult<()> {
    ws(input)?;
    object(input, 0, &mut |key, value| {
        fields.push(Field { key, value }).map_err(|_| {
            *overflow = true;
            ErrMode::Cut(ContextError::new())
        })
    })?;
    ws(input)
}

fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

fn reject<O>(input: &mut &str) -> ModalResult<O> {
    cut_err(fail).parse_next(input)
}

fn token(input: &mut &str, mut expected: char) -> ModalResult<char> {
    expected.parse_next(input)
}

fn closes(input: &mut &str, delimiter: char) -> ModalResult<bool> {
    opt(delimiter).map(|found| found.is_some()).parse_next(input)
}

fn next_char(input: &mut &str) -> ModalResult<char> {
    any.parse_next(input)
}

fn object<'a>(
    input: &mut &'a str,
    depth: u8,
    visit: &mut dyn FnMut(&'a str, JsonValue<'a>) -> ModalResult<()>,
) -> ModalResult<()> {
    if depth > MAX_DEPTH {
        return reject(input);
    }
    token(input, '{')?;
    ws(input)?;
    if closes(input, '}')? {
        return Ok(());
    }

    loop {
        ws(input)?;
        let key = string(input)?;
        ws(input)?;
        token(input, ':')?;
        let member = value(input, depth)?;
        visit(key, member)?;
        ws(input)?;
        match next_char(input)? {
            ',' => {}
            '}' => return Ok(()),
            _ => return reject(input),
        }
    }
}

fn array(input: &mut &str, depth: u8) -> ModalResult<()> {
    if depth > MAX_DEPTH {
        return reject(input);
    }
    token(input, '[')?;
    ws(input)?;
    if closes(input, ']')? {
        return Ok(());
    }

    loop {
        value(input, depth)?;
        ws(input)?;
        match next_char(input)? {
            ',' => {}
            ']' => return Ok(()),
            _ => return reject(input),
        }
    }
}

fn value<'a>(input: &mut &'a str, depth: u8) -> ModalResult<JsonValue<'a>> {
    ws(input)?;
    match input.chars().next() {
        Some('"') => string.map(JsonValue::Str).parse_next(input),
        Some('{') => {
            let start = *input;
            object(input, depth + 1, &mut |_, _| Ok(()))?;
            let consumed = start.len() - input.len();
            Ok(JsonValue::Object(&start[..consumed]))
        }
        Some('[') => {
            array(input, depth + 1)?;
            Ok(JsonValue::Array)
        }
        Some('t') => "true".value(JsonValue::Bool(true)).parse_next(input),
        Some('f') => "false".value(JsonValue::Bool(false)).parse_next(input),
        Some('n') => "null".value(JsonValue::Null).parse_next(input),
        Some(_) => number.map(JsonValue::Number).parse_next(input),
        None => reject(input),
    }
}

fn string<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    delimited('"', string_body, '"').parse_next(input)
}

fn string_body<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    repeat::<_, _, (), _, _>(0.., alt((take_till(1.., ['"', '\\']).void(), escape)))
        .take()
        .parse_next(input)
}

fn escape(input: &mut &str) -> ModalResult<()> {
    preceded(
        '\\',
        alt((
            one_of(['"', '\\', '/', 'b', 'f', 'n', 'r', 't']).void(),
            preceded('u', take_while(4, |c: char| c.is_ascii_hexdigit())).void(),
        )),
    )
    .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<f64> {
    (
        opt('-'),
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .try_map(|text: &str| text.parse::<f64>())
        .parse_next(input)
}

/// Decodes the raw text of a nested object captured as [`JsonValue::Object`].
///
/// # Errors
///
/// Same as [`parse_message`].
pub fn parse_object(raw: &str) -> Result<Message<'_>, ProtocolError> {
    parse_message(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_flat_message() {
        let message =
            parse_message(r#" {"command": "move_forward", "priority": 0, "ok": true, "x": null} "#)
                .unwrap();

        assert_eq!(message.get("command"), Some(JsonValue::Str("move_forward")));
        assert_eq!(message.get("priority"), Some(JsonValue::Number(0.0)));
        assert_eq!(message.get("ok"), Some(JsonValue::Bool(true)));
        assert_eq!(message.get("x"), Some(JsonValue::Null));
        assert_eq!(message.get("missing"), None);
    }

    #[test]
    fn keeps_nested_object_as_raw_text() {
        let message =
            parse_message(r#"{"command":"turn_left","parameters":{"angle":45.5,"speed":0.3}}"#)
                .unwrap();

        let Some(JsonValue::Object(raw)) = message.get("parameters") else {
            panic!("expected object");
        };
        assert_eq!(raw, r#"{"angle":45.5,"speed":0.3}"#);

        let params = parse_object(raw).unwrap();
        assert_eq!(params.get("angle"), Some(JsonValue::Number(45.5)));
        assert_eq!(params.get("speed"), Some(JsonValue::Number(0.3)));
    }

    #[test]
    fn numbers_follow_json_grammar() {
        let message = parse_message(r#"{"a":-1.5e2,"b":3E-1,"c":42}"#).unwrap();
        assert_eq!(message.get("a"), Some(JsonValue::Number(-150.0)));
        assert_eq!(message.get("b").and_then(|v| v.as_number()), Some(0.3));
        assert_eq!(message.get("c"), Some(JsonValue::Number(42.0)));

        assert_eq!(parse_message(r#"{"a":.5}"#), Err(ProtocolError::Malformed));
        assert_eq!(parse_message(r#"{"a":1.}"#), Err(ProtocolError::Malformed));
    }

    #[test]
    fn strings_keep_escapes_raw() {
        let message = parse_message(r#"{"s":"a\"b\\cé"}"#).unwrap();
        assert_eq!(message.get("s"), Some(JsonValue::Str(r#"a\"b\\cé"#)));
        assert_eq!(parse_message(r#"{"s":"\q"}"#), Err(ProtocolError::Malformed));
    }

    #[test]
    fn arrays_are_reduced_to_markers() {
        let message = parse_message(r#"{"list":[1, "two", {"three":3}, []]}"#).unwrap();
        assert_eq!(message.get("list"), Some(JsonValue::Array));
    }

    #[test]
    fn rejects_non_objects_and_trailing_garbage() {
        for text in [
            "",
            "stop",
            "[1,2]",
            r#""command""#,
            r#"{"command":"stop"} x"#,
            r#"{"command":"stop",}"#,
            r#"{"command" "stop"}"#,
            r#"{"command":"stop""#,
            r#"{command:"stop"}"#,
        ] {
            assert_eq!(parse_message(text), Err(ProtocolError::Malformed), "{text}");
        }
    }

    #[test]
    fn caps_nesting_depth() {
        assert!(parse_message(r#"{"a":{"b":{"c":{"d":{}}}}}"#).is_ok());
        assert_eq!(
            parse_message(r#"{"a":{"b":{"c":{"d":{"e":{}}}}}}"#),
            Err(ProtocolError::Malformed)
        );
    }

    #[test]
    fn caps_member_count() {
        let mut text = heapless::String::<256>::new();
        text.push('{').unwrap();
        for index in 0..=MAX_FIELDS {
            if index > 0 {
                text.push(',').unwrap();
            }
            core::fmt::Write::write_fmt(&mut text, format_args!("\"k{index}\":{index}")).unwrap();
        }
        text.push('}').unwrap();
        assert_eq!(parse_message(&text), Err(ProtocolError::TooManyFields));
    }

    #[test]
    fn last_duplicate_wins() {
        let message = parse_message(r#"{"command":"stop","command":"status"}"#).unwrap();
        assert_eq!(message.get("command"), Some(JsonValue::Str("status")));
    }
}
