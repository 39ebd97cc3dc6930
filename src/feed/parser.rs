use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors that can occur while decoding a feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes are not a well-formed XML document
    #[error("Malformed XML: {0}")]
    MalformedXml(String),
}

/// Channel metadata plus its items in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<Item>,
}

/// A single `<item>`. Every field is empty when the feed omits it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Which text-bearing element the reader is currently inside.
#[derive(Debug, Clone, Copy)]
enum Field {
    ChannelTitle,
    ChannelLink,
    ChannelDescription,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPubDate,
}

/// Decode an RSS 2.0 document.
///
/// Only unprefixed `title`, `link`, `description` and `pubDate` children of
/// `<channel>` and `<item>` are read; anything else (including namespaced
/// elements such as `atom:link` or `dc:creator`) is skipped. Text, CDATA
/// and the text of nested markup are joined as they appear and each field
/// is trimmed once at the end. After XML decoding every collected string is
/// HTML-unescaped once more, since many producers escape entities twice
/// (`&amp;amp;`).
///
/// # Errors
///
/// [`ParseError::MalformedXml`] when the document is not UTF-8, the XML is
/// syntactically broken, has no root element, or ends before the root
/// element is closed.
pub fn parse(bytes: &[u8]) -> Result<Channel, ParseError> {
    // Other declared encodings are refused rather than decoded lossily
    std::str::from_utf8(bytes)
        .map_err(|e| ParseError::MalformedXml(format!("document is not UTF-8: {e}")))?;

    let mut reader = Reader::from_reader(bytes);

    let mut channel = Channel::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    // Field being collected and the stack depth of its element; markup
    // nested inside the element still contributes its text
    let mut field: Option<(Field, usize)> = None;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::MalformedXml(e.to_string()))?;

        match event {
            Event::Start(e) => {
                if stack.is_empty() && saw_root {
                    return Err(ParseError::MalformedXml(
                        "multiple root elements".to_string(),
                    ));
                }
                saw_root = true;
                let name = e.name().as_ref().to_vec();

                if field.is_none() {
                    let parent = stack.last().map(Vec::as_slice);
                    if matches!(parent, Some(b"channel")) && name == b"item" {
                        channel.items.push(Item::default());
                    }
                    if let Some(f) = field_for(&stack, &name) {
                        // Last occurrence wins when an element repeats
                        if let Some(text) = target(&mut channel, f) {
                            text.clear();
                        }
                        field = Some((f, stack.len()));
                    }
                }
                stack.push(name);
            }
            Event::Empty(_) => {
                if stack.is_empty() {
                    if saw_root {
                        return Err(ParseError::MalformedXml(
                            "multiple root elements".to_string(),
                        ));
                    }
                    // A lone self-closing root is an empty document
                    saw_root = true;
                }
            }
            Event::End(_) => {
                stack.pop();
                if field.is_some_and(|(_, depth)| depth == stack.len()) {
                    field = None;
                }
            }
            Event::Text(e) => {
                if let Some(text) = collecting(&mut channel, field) {
                    let raw = utf8(&e)?;
                    // Entities XML does not know (&nbsp;) fail the XML decode;
                    // the HTML decoder covers the XML set too
                    match quick_xml::escape::unescape(raw) {
                        Ok(decoded) => text.push_str(&decoded),
                        Err(_) => text.push_str(&html_escape::decode_html_entities(raw)),
                    }
                }
            }
            Event::CData(e) => {
                if let Some(text) = collecting(&mut channel, field) {
                    text.push_str(utf8(&e)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseError::MalformedXml("no root element".to_string()));
    }
    if let Some(open) = stack.last() {
        return Err(ParseError::MalformedXml(format!(
            "document ended inside <{}>",
            String::from_utf8_lossy(open)
        )));
    }

    finish_channel(&mut channel);
    Ok(channel)
}

fn utf8(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::MalformedXml(e.to_string()))
}

/// Map an element about to be opened to the field it fills, if any.
fn field_for(stack: &[Vec<u8>], name: &[u8]) -> Option<Field> {
    let parent = stack.last().map(Vec::as_slice);
    let grandparent = stack.len().checked_sub(2).map(|i| stack[i].as_slice());

    match (grandparent, parent, name) {
        (_, Some(b"channel"), b"title") => Some(Field::ChannelTitle),
        (_, Some(b"channel"), b"link") => Some(Field::ChannelLink),
        (_, Some(b"channel"), b"description") => Some(Field::ChannelDescription),
        (Some(b"channel"), Some(b"item"), b"title") => Some(Field::ItemTitle),
        (Some(b"channel"), Some(b"item"), b"link") => Some(Field::ItemLink),
        (Some(b"channel"), Some(b"item"), b"description") => Some(Field::ItemDescription),
        (Some(b"channel"), Some(b"item"), b"pubDate") => Some(Field::ItemPubDate),
        _ => None,
    }
}

fn collecting(channel: &mut Channel, field: Option<(Field, usize)>) -> Option<&mut String> {
    target(channel, field?.0)
}

fn target(channel: &mut Channel, field: Field) -> Option<&mut String> {
    let item = match field {
        Field::ChannelTitle => return Some(&mut channel.title),
        Field::ChannelLink => return Some(&mut channel.link),
        Field::ChannelDescription => return Some(&mut channel.description),
        _ => channel.items.last_mut()?,
    };
    Some(match field {
        Field::ItemTitle => &mut item.title,
        Field::ItemLink => &mut item.link,
        Field::ItemDescription => &mut item.description,
        _ => &mut item.pub_date,
    })
}

fn finish_channel(channel: &mut Channel) {
    finish_field(&mut channel.title);
    finish_field(&mut channel.link);
    finish_field(&mut channel.description);
    for item in &mut channel.items {
        finish_field(&mut item.title);
        finish_field(&mut item.link);
        finish_field(&mut item.description);
        finish_field(&mut item.pub_date);
    }
}

/// Trim the joined fragments, then apply the second (HTML) decode.
fn finish_field(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.contains('&') {
        *value = html_escape::decode_html_entities(trimmed).into_owned();
    } else if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}
