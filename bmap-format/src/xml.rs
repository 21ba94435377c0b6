//! A minimal XML reader producing an element tree.
//!
//! Only what bmap documents need is supported: the prolog, comments,
//! processing instructions, a DOCTYPE declaration (skipped), elements with
//! attributes, character data, CDATA sections and the predefined and numeric
//! character references. Namespaces and DTD entity definitions are not
//! interpreted.

use snafu::{OptionExt, Snafu, ensure};

use xml_error::*;

/// Deepest element nesting accepted. bmap documents use three levels.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum XmlError {
    #[snafu(display("unexpected end of document, expected {expected}"))]
    UnexpectedEof { expected: &'static str },

    #[snafu(display("unexpected character at offset {offset}, expected {expected}"))]
    UnexpectedChar {
        offset: usize,
        expected: &'static str,
    },

    #[snafu(display("closing tag </{close}> at offset {offset} does not match <{open}>"))]
    MismatchedTag {
        offset: usize,
        open: String,
        close: String,
    },

    #[snafu(display("invalid character reference '&{entity};' at offset {offset}"))]
    InvalidEntity { offset: usize, entity: String },

    #[snafu(display("duplicate attribute '{name}' at offset {offset}"))]
    DuplicateAttribute { offset: usize, name: String },

    #[snafu(display("elements nested deeper than {MAX_DEPTH} levels at offset {offset}"))]
    TooDeep { offset: usize },

    #[snafu(display("document has no root element"))]
    MissingRoot,

    #[snafu(display("unexpected content after the root element at offset {offset}"))]
    TrailingContent { offset: usize },
}

/// An element with its attributes, child elements and character data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Returns the first child element named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Character data directly inside this element, comments excluded.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Parses `src` and returns its root element.
pub fn parse(src: &str) -> Result<Element, XmlError> {
    let mut reader = Reader {
        src: src.strip_prefix('\u{feff}').unwrap_or(src),
        pos: 0,
        depth: 0,
    };

    reader.skip_misc()?;

    ensure!(reader.peek().is_some(), MissingRootSnafu);
    reader.expect("<", "'<'")?;

    let root = reader.element()?;

    reader.skip_misc()?;

    ensure!(
        reader.rest().is_empty(),
        TrailingContentSnafu { offset: reader.pos }
    );

    Ok(root)
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    /// Number of elements currently open.
    depth: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn expect(&mut self, s: &str, expected: &'static str) -> Result<(), XmlError> {
        if self.starts_with(s) {
            self.pos += s.len();
            return Ok(());
        }

        match self.peek() {
            Some(_) => UnexpectedCharSnafu {
                offset: self.pos,
                expected,
            }
            .fail(),
            None => UnexpectedEofSnafu { expected }.fail(),
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start_matches(|c: char| c.is_ascii_whitespace());
        self.pos = self.src.len() - trimmed.len();
    }

    /// Consumes everything up to and including `end`, returning the text before it.
    fn take_until(&mut self, end: &str, expected: &'static str) -> Result<&'a str, XmlError> {
        let idx = self.rest().find(end).context(UnexpectedEofSnafu { expected })?;
        let text = &self.rest()[..idx];

        self.pos += idx + end.len();

        Ok(text)
    }

    /// Skips whitespace, comments, processing instructions and DOCTYPE
    /// declarations outside of the root element.
    fn skip_misc(&mut self) -> Result<(), XmlError> {
        loop {
            self.skip_ws();

            if self.starts_with("<?") {
                self.take_until("?>", "'?>'")?;
            } else if self.starts_with("<!--") {
                self.take_until("-->", "'-->'")?;
            } else if self.starts_with("<!DOCTYPE") {
                self.skip_doctype()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_doctype(&mut self) -> Result<(), XmlError> {
        let mut depth = 0usize;

        for (i, c) in self.rest().char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '>' if depth == 0 => {
                    self.pos += i + 1;
                    return Ok(());
                }
                _ => {}
            }
        }

        UnexpectedEofSnafu {
            expected: "end of DOCTYPE",
        }
        .fail()
    }

    fn name(&mut self) -> Result<&'a str, XmlError> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .unwrap_or(rest.len());

        if len == 0 {
            return match self.peek() {
                Some(_) => UnexpectedCharSnafu {
                    offset: self.pos,
                    expected: "a name",
                }
                .fail(),
                None => UnexpectedEofSnafu { expected: "a name" }.fail(),
            };
        }

        self.pos += len;

        Ok(&rest[..len])
    }

    /// Parses an element whose opening `<` has already been consumed.
    fn element(&mut self) -> Result<Element, XmlError> {
        ensure!(
            self.depth < MAX_DEPTH,
            TooDeepSnafu {
                offset: self.pos.saturating_sub(1),
            }
        );

        self.depth += 1;
        let element = self.element_inner();
        self.depth -= 1;

        element
    }

    fn element_inner(&mut self) -> Result<Element, XmlError> {
        let mut element = Element {
            name: self.name()?.to_owned(),
            ..Element::default()
        };

        loop {
            self.skip_ws();

            if self.starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }

            if self.starts_with(">") {
                self.pos += 1;
                break;
            }

            let offset = self.pos;
            let name = self.name()?.to_owned();

            ensure!(
                element.attribute(&name).is_none(),
                DuplicateAttributeSnafu { offset, name }
            );

            self.skip_ws();
            self.expect("=", "'='")?;
            self.skip_ws();

            let quote = match self.peek() {
                Some(q @ ('"' | '\'')) => q,
                Some(_) => {
                    return UnexpectedCharSnafu {
                        offset: self.pos,
                        expected: "a quoted attribute value",
                    }
                    .fail();
                }
                None => {
                    return UnexpectedEofSnafu {
                        expected: "a quoted attribute value",
                    }
                    .fail();
                }
            };

            self.pos += 1;

            let start = self.pos;
            let raw = self.take_until(if quote == '"' { "\"" } else { "'" }, "closing quote")?;
            let value = unescape(raw, start)?;

            element.attributes.push((name, value));
        }

        self.content(&mut element)?;

        Ok(element)
    }

    fn content(&mut self, element: &mut Element) -> Result<(), XmlError> {
        loop {
            if self.starts_with("</") {
                let offset = self.pos;

                self.pos += 2;

                let close = self.name()?;

                ensure!(
                    close == element.name,
                    MismatchedTagSnafu {
                        offset,
                        open: element.name.clone(),
                        close,
                    }
                );

                self.skip_ws();
                self.expect(">", "'>'")?;

                return Ok(());
            } else if self.starts_with("<!--") {
                self.take_until("-->", "'-->'")?;
            } else if self.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let data = self.take_until("]]>", "']]>'")?;
                element.text.push_str(data);
            } else if self.starts_with("<?") {
                self.take_until("?>", "'?>'")?;
            } else if self.starts_with("<") {
                self.pos += 1;
                let child = self.element()?;
                element.children.push(child);
            } else if self.peek().is_some() {
                let start = self.pos;
                let idx = self.rest().find('<').unwrap_or(self.rest().len());
                let raw = &self.rest()[..idx];

                self.pos += idx;
                element.text.push_str(&unescape(raw, start)?);
            } else {
                return UnexpectedEofSnafu {
                    expected: "a closing tag",
                }
                .fail();
            }
        }
    }
}

/// Replaces character references in `raw`, which starts at byte `base` of the
/// document.
fn unescape(raw: &str, base: usize) -> Result<String, XmlError> {
    if !raw.contains('&') {
        return Ok(raw.to_owned());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);

        let offset = base + (raw.len() - rest.len()) + amp;
        let after = &rest[amp + 1..];
        let semi = after.find(';').context(InvalidEntitySnafu {
            offset,
            entity: after.chars().take(8).collect::<String>(),
        })?;
        let entity = &after[..semi];

        let c = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };

                code.and_then(char::from_u32)
            }
        };

        out.push(c.context(InvalidEntitySnafu { offset, entity })?);
        rest = &after[semi + 1..];
    }

    out.push_str(rest);

    Ok(out)
}
