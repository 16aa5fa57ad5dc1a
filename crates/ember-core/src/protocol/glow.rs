//! Glow DTD message encoding and decoding.
//!
//! Covers the subset the client needs: `getDirectory` requests, matrix
//! connect requests, and decoding of directory listings and connection
//! updates. Elements the decoder does not understand are skipped.

use thiserror::Error;
use tracing::trace;

use super::ber::{self, BerError, BerReader};

// Application tags from the GlowDTD.
const GLOW_PARAMETER: u8 = ber::application(1);
const GLOW_COMMAND: u8 = ber::application(2);
const GLOW_NODE: u8 = ber::application(3);
const GLOW_ELEMENT_COLLECTION: u8 = ber::application(4);
const GLOW_QUALIFIED_PARAMETER: u8 = ber::application(9);
const GLOW_QUALIFIED_NODE: u8 = ber::application(10);
const GLOW_ROOT_COLLECTION: u8 = ber::application(11);
const GLOW_MATRIX: u8 = ber::application(13);
const GLOW_CONNECTION: u8 = ber::application(16);
const GLOW_QUALIFIED_MATRIX: u8 = ber::application(17);
/// Root ::= [APPLICATION 0].
const GLOW_ROOT: u8 = ber::application(0);

const COMMAND_GET_DIRECTORY: i64 = 32;

/// ConnectionOperation.connect
const OPERATION_CONNECT: i64 = 1;

#[derive(Error, Debug)]
pub enum GlowError {
    #[error("BER error: {0}")]
    Ber(#[from] BerError),
    #[error("Expected {expected}, found tag 0x{found:02X}")]
    UnexpectedTag { expected: &'static str, found: u8 },
}

/// What kind of element a tree entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Node,
    Parameter,
    Matrix,
}

/// Matrix dimensions reported in MatrixContents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixInfo {
    pub target_count: u32,
    pub source_count: u32,
}

/// One child in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// Path segment below the listed node.
    pub number: u32,
    pub kind: ElementKind,
    pub identifier: Option<String>,
    pub matrix: Option<MatrixInfo>,
}

/// How the device resolved a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Tally,
    Modified,
    Pending,
    Locked,
}

impl Disposition {
    fn from_value(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Tally),
            1 => Some(Self::Modified),
            2 => Some(Self::Pending),
            3 => Some(Self::Locked),
            _ => None,
        }
    }
}

/// A decoded application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// Children reported for the node at `path`.
    Directory {
        path: Vec<u32>,
        children: Vec<ChildEntry>,
    },
    /// Current sources for one matrix target.
    ConnectionUpdate {
        matrix_path: Vec<u32>,
        target: u32,
        sources: Vec<u32>,
        disposition: Option<Disposition>,
    },
}

fn encode_command_get_directory() -> Vec<u8> {
    let mut number = Vec::new();
    ber::write_integer(&mut number, ber::TAG_INTEGER, COMMAND_GET_DIRECTORY);
    let mut field = Vec::new();
    ber::write_tlv(&mut field, ber::context(0), &number);
    let mut command = Vec::new();
    ber::write_tlv(&mut command, GLOW_COMMAND, &field);
    command
}

/// Path field: context tag wrapping a RELATIVE-OID (explicit tagging).
fn write_path_field(out: &mut Vec<u8>, field: u8, path: &[u32]) {
    let mut oid = Vec::new();
    ber::write_relative_oid(&mut oid, ber::TAG_RELATIVE_OID, path);
    ber::write_tlv(out, field, &oid);
}

fn wrap_root(element: &[u8]) -> Vec<u8> {
    let mut item = Vec::new();
    ber::write_tlv(&mut item, ber::context(0), element);
    let mut collection = Vec::new();
    ber::write_tlv(&mut collection, GLOW_ROOT_COLLECTION, &item);
    let mut root = Vec::new();
    ber::write_tlv(&mut root, GLOW_ROOT, &collection);
    root
}

/// EmBER payload requesting the directory of `path` (empty = device root).
pub fn encode_get_directory(path: &[u32]) -> Vec<u8> {
    let command = encode_command_get_directory();
    if path.is_empty() {
        return wrap_root(&command);
    }

    let mut path_field = Vec::new();
    write_path_field(&mut path_field, ber::context(0), path);

    // children [2] ElementCollection { [0] Command }
    let mut item = Vec::new();
    ber::write_tlv(&mut item, ber::context(0), &command);
    let mut collection = Vec::new();
    ber::write_tlv(&mut collection, GLOW_ELEMENT_COLLECTION, &item);
    let mut children_field = Vec::new();
    ber::write_tlv(&mut children_field, ber::context(2), &collection);

    let mut node = path_field;
    node.extend_from_slice(&children_field);
    let mut qualified = Vec::new();
    ber::write_tlv(&mut qualified, GLOW_QUALIFIED_NODE, &node);
    wrap_root(&qualified)
}

/// EmBER payload connecting `sources` to `target` on the matrix at `path`.
pub fn encode_matrix_connect(path: &[u32], target: u32, sources: &[u32]) -> Vec<u8> {
    let mut connection = Vec::new();
    {
        let mut target_field = Vec::new();
        ber::write_integer(&mut target_field, ber::TAG_INTEGER, target as i64);
        ber::write_tlv(&mut connection, ber::context(0), &target_field);

        let mut sources_field = Vec::new();
        ber::write_relative_oid(&mut sources_field, ber::TAG_RELATIVE_OID, sources);
        ber::write_tlv(&mut connection, ber::context(1), &sources_field);

        let mut operation_field = Vec::new();
        ber::write_integer(&mut operation_field, ber::TAG_INTEGER, OPERATION_CONNECT);
        ber::write_tlv(&mut connection, ber::context(2), &operation_field);
    }
    let mut connection_tlv = Vec::new();
    ber::write_tlv(&mut connection_tlv, GLOW_CONNECTION, &connection);

    // connections [5] ConnectionCollection ::= SEQUENCE OF [0] Connection
    let mut item = Vec::new();
    ber::write_tlv(&mut item, ber::context(0), &connection_tlv);
    let mut seq = Vec::new();
    ber::write_tlv(&mut seq, ber::TAG_SEQUENCE, &item);
    let mut connections_field = Vec::new();
    ber::write_tlv(&mut connections_field, ber::context(5), &seq);

    let mut matrix = Vec::new();
    write_path_field(&mut matrix, ber::context(0), path);
    matrix.extend_from_slice(&connections_field);
    let mut qualified = Vec::new();
    ber::write_tlv(&mut qualified, GLOW_QUALIFIED_MATRIX, &matrix);
    wrap_root(&qualified)
}

/// Decode one EmBER payload into application messages.
pub fn decode(payload: &[u8]) -> Result<Vec<DecodedMessage>, GlowError> {
    let mut reader = BerReader::new(payload);
    let (tag, contents) = reader.read_tlv()?;
    if tag != GLOW_ROOT {
        return Err(GlowError::UnexpectedTag {
            expected: "Root",
            found: tag,
        });
    }

    let mut root = BerReader::new(contents);
    let (tag, collection) = root.read_tlv()?;
    if tag != GLOW_ROOT_COLLECTION {
        // Roots can also carry streams or invocation results; neither is
        // interesting here.
        trace!(tag, "Ignoring non-element root");
        return Ok(Vec::new());
    }

    let mut messages = Vec::new();
    let mut items = BerReader::new(collection);
    while !items.is_empty() {
        let (_, element) = items.read_tlv()?; // [0] RootElement
        let mut reader = BerReader::new(element);
        if reader.is_empty() {
            continue;
        }
        decode_element(&mut reader, &mut messages)?;
    }
    Ok(messages)
}

fn decode_element(
    reader: &mut BerReader<'_>,
    messages: &mut Vec<DecodedMessage>,
) -> Result<(), GlowError> {
    let Some(tag) = reader.peek_tag() else {
        return Ok(());
    };
    match tag {
        GLOW_QUALIFIED_NODE | GLOW_QUALIFIED_PARAMETER | GLOW_QUALIFIED_MATRIX => {
            let (_, contents) = reader.read_tlv()?;
            decode_qualified(tag, contents, messages)
        }
        GLOW_NODE | GLOW_PARAMETER | GLOW_MATRIX => {
            // A bare element at the root sits directly under the tree root.
            let (_, contents) = reader.read_tlv()?;
            let mut children = Vec::new();
            decode_nested(tag, contents, &[], &mut children, messages)?;
            if !children.is_empty() {
                messages.push(DecodedMessage::Directory {
                    path: Vec::new(),
                    children,
                });
            }
            Ok(())
        }
        other => {
            trace!(tag = other, "Skipping unhandled element");
            reader.skip()?;
            Ok(())
        }
    }
}

/// Decode a Qualified{Node,Parameter,Matrix}.
fn decode_qualified(
    tag: u8,
    contents: &[u8],
    messages: &mut Vec<DecodedMessage>,
) -> Result<(), GlowError> {
    let kind = match tag {
        GLOW_QUALIFIED_PARAMETER => ElementKind::Parameter,
        GLOW_QUALIFIED_MATRIX => ElementKind::Matrix,
        _ => ElementKind::Node,
    };

    let mut path = Vec::new();
    let mut identifier = None;
    let mut matrix = None;
    let mut children = Vec::new();

    let mut fields = BerReader::new(contents);
    while !fields.is_empty() {
        let (field_tag, field) = fields.read_tlv()?;
        match field_tag {
            t if t == ber::context(0) => {
                let mut inner = BerReader::new(field);
                let (_, oid) = inner.read_tlv()?;
                path = ber::decode_relative_oid(oid)?;
            }
            t if t == ber::context(1) => {
                let (ident, info) = decode_contents(field, kind)?;
                identifier = ident;
                matrix = info;
            }
            t if t == ber::context(2) => {
                decode_element_collection(field, &path, &mut children, messages)?;
            }
            t if t == ber::context(5) && kind == ElementKind::Matrix => {
                decode_connections(field, &path, messages)?;
            }
            _ => {} // targets, sources, labels: not mirrored
        }
    }

    if !children.is_empty() {
        messages.push(DecodedMessage::Directory {
            path: path.clone(),
            children,
        });
    } else if identifier.is_some() || matrix.is_some() {
        // A qualified element with contents but no children is itself a
        // listing entry for its parent. Devices answer per-child
        // getDirectory this way.
        if let Some((&number, parent)) = path.split_last() {
            messages.push(DecodedMessage::Directory {
                path: parent.to_vec(),
                children: vec![ChildEntry {
                    number,
                    kind,
                    identifier,
                    matrix,
                }],
            });
        }
    }
    Ok(())
}

/// Decode an ElementCollection of nested children one level deep.
fn decode_element_collection(
    field: &[u8],
    base_path: &[u32],
    children: &mut Vec<ChildEntry>,
    messages: &mut Vec<DecodedMessage>,
) -> Result<(), GlowError> {
    let mut inner = BerReader::new(field);
    let (tag, collection) = inner.read_tlv()?;
    if tag != GLOW_ELEMENT_COLLECTION {
        return Err(GlowError::UnexpectedTag {
            expected: "ElementCollection",
            found: tag,
        });
    }
    let mut items = BerReader::new(collection);
    while !items.is_empty() {
        let (_, element) = items.read_tlv()?; // [0] Element
        let mut element_reader = BerReader::new(element);
        let Some(child_tag) = element_reader.peek_tag() else {
            continue;
        };
        match child_tag {
            GLOW_NODE | GLOW_PARAMETER | GLOW_MATRIX => {
                let (_, contents) = element_reader.read_tlv()?;
                decode_nested(child_tag, contents, base_path, children, messages)?;
            }
            _ => {} // commands echoed back, templates, ...
        }
    }
    Ok(())
}

/// Decode a nested Node/Parameter/Matrix: `{ number [0], contents [1], ... }`.
fn decode_nested(
    tag: u8,
    contents: &[u8],
    base_path: &[u32],
    children: &mut Vec<ChildEntry>,
    messages: &mut Vec<DecodedMessage>,
) -> Result<(), GlowError> {
    let kind = match tag {
        GLOW_PARAMETER => ElementKind::Parameter,
        GLOW_MATRIX => ElementKind::Matrix,
        _ => ElementKind::Node,
    };

    let mut number = None;
    let mut identifier = None;
    let mut matrix = None;

    let mut fields = BerReader::new(contents);
    while !fields.is_empty() {
        let (field_tag, field) = fields.read_tlv()?;
        match field_tag {
            t if t == ber::context(0) => {
                let mut inner = BerReader::new(field);
                let (_, int) = inner.read_tlv()?;
                number = Some(ber::decode_integer(int)? as u32);
            }
            t if t == ber::context(1) => {
                let (ident, info) = decode_contents(field, kind)?;
                identifier = ident;
                matrix = info;
            }
            t if t == ber::context(5) && kind == ElementKind::Matrix => {
                if let Some(n) = number {
                    let mut matrix_path = base_path.to_vec();
                    matrix_path.push(n);
                    decode_connections(field, &matrix_path, messages)?;
                }
            }
            _ => {}
        }
    }

    if let Some(number) = number {
        children.push(ChildEntry {
            number,
            kind,
            identifier,
            matrix,
        });
    }
    Ok(())
}

/// Decode a contents SET, returning the identifier and matrix dimensions.
fn decode_contents(
    field: &[u8],
    kind: ElementKind,
) -> Result<(Option<String>, Option<MatrixInfo>), GlowError> {
    let mut inner = BerReader::new(field);
    let (tag, set) = inner.read_tlv()?;
    if tag != ber::TAG_SET {
        return Err(GlowError::UnexpectedTag {
            expected: "SET",
            found: tag,
        });
    }

    let mut identifier = None;
    let mut target_count = None;
    let mut source_count = None;

    let mut fields = BerReader::new(set);
    while !fields.is_empty() {
        let (field_tag, value_field) = fields.read_tlv()?;
        let mut value = BerReader::new(value_field);
        match field_tag {
            t if t == ber::context(0) => {
                let (_, s) = value.read_tlv()?;
                identifier = Some(ber::decode_utf8(s)?);
            }
            t if t == ber::context(4) && kind == ElementKind::Matrix => {
                let (_, int) = value.read_tlv()?;
                target_count = Some(ber::decode_integer(int)? as u32);
            }
            t if t == ber::context(5) && kind == ElementKind::Matrix => {
                let (_, int) = value.read_tlv()?;
                source_count = Some(ber::decode_integer(int)? as u32);
            }
            _ => {} // description, value, type, addressing mode, ...
        }
    }

    let matrix = if kind == ElementKind::Matrix {
        Some(MatrixInfo {
            target_count: target_count.unwrap_or(0),
            source_count: source_count.unwrap_or(0),
        })
    } else {
        None
    };
    Ok((identifier, matrix))
}

/// Decode `connections [5]`: SEQUENCE OF [0] Connection.
fn decode_connections(
    field: &[u8],
    matrix_path: &[u32],
    messages: &mut Vec<DecodedMessage>,
) -> Result<(), GlowError> {
    let mut inner = BerReader::new(field);
    let (tag, seq) = inner.read_tlv()?;
    if tag != ber::TAG_SEQUENCE {
        return Err(GlowError::UnexpectedTag {
            expected: "ConnectionCollection",
            found: tag,
        });
    }

    let mut items = BerReader::new(seq);
    while !items.is_empty() {
        let (_, item) = items.read_tlv()?; // [0] Connection
        let mut item_reader = BerReader::new(item);
        let (tag, connection) = item_reader.read_tlv()?;
        if tag != GLOW_CONNECTION {
            continue;
        }

        let mut target = None;
        let mut sources = Vec::new();
        let mut disposition = None;

        let mut fields = BerReader::new(connection);
        while !fields.is_empty() {
            let (field_tag, value_field) = fields.read_tlv()?;
            let mut value = BerReader::new(value_field);
            match field_tag {
                t if t == ber::context(0) => {
                    let (_, int) = value.read_tlv()?;
                    target = Some(ber::decode_integer(int)? as u32);
                }
                t if t == ber::context(1) => {
                    let (_, oid) = value.read_tlv()?;
                    sources = ber::decode_relative_oid(oid)?;
                }
                t if t == ber::context(3) => {
                    let (_, int) = value.read_tlv()?;
                    disposition = Disposition::from_value(ber::decode_integer(int)?);
                }
                _ => {} // operation echo
            }
        }

        if let Some(target) = target {
            messages.push(DecodedMessage::ConnectionUpdate {
                matrix_path: matrix_path.to_vec(),
                target,
                sources,
                disposition,
            });
        }
    }
    Ok(())
}
