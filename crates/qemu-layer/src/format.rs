//! Textual layer format
//!
//! INI-style sections:
//! - `[general]` holds [`GeneralSettings`].
//! - `[name]` / `[name:id]` each become one [`Argument`]. The `@` key is the
//!   positional value, a bare key is a presence flag, anything else is an
//!   attribute.
//!
//! Keys and section names are case-sensitive. Lines starting with `#` or `;`
//! are comments. A line indented deeper than the key before it continues
//! that key's value; indenting under a presence flag is an error.
//!
//! The serializer refuses layers the parser would read back differently:
//! keys holding a delimiter, values with edge whitespace, and the like.

use std::fmt::Write as _;

use crate::argument::{Argument, Attributes, ID_KEY};
use crate::error::{Error, Result};
use crate::layer::{GeneralSettings, Layer};

/// Section holding the general settings.
pub const GENERAL_SECTION: &str = "general";

/// Key holding an argument's positional value.
pub const VALUE_KEY: &str = "@";

/// Keys understood in the `[general]` section.
pub const GENERAL_KEYS: &[&str] = &[
    "engine", "kernel", "cmdline", "mode", "gdb", "gdb_dev", "halted", "cpu", "memory",
];

/// A parsed `[section]` with its entries in file order.
#[derive(Debug)]
struct Section {
    name: String,
    line: usize,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    key: String,
    value: Option<String>,
    line: usize,
    indent: usize,
}

/// Parse one layer from text.
pub fn parse_layer(text: &str) -> Result<Layer> {
    let sections = read_sections(text)?;

    let mut general = GeneralSettings::default();
    let mut arguments = Vec::new();

    for section in &sections {
        if section.name == GENERAL_SECTION {
            general = read_general(section)?;
        } else {
            arguments.push(read_argument(section)?);
        }
    }

    Ok(Layer::new(general, arguments))
}

fn read_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let indent = raw.len() - raw.trim_start().len();

        // Continuation of the previous value
        if let Some(section) = sections.last_mut() {
            if let Some(entry) = section.entries.last_mut() {
                if indent > entry.indent {
                    match entry.value.as_mut() {
                        Some(value) => {
                            value.push('\n');
                            value.push_str(trimmed);
                            continue;
                        }
                        None => {
                            return Err(Error::Parse {
                                line: line_no,
                                message: format!("'{}' continues presence flag '{}'", trimmed, entry.key),
                            });
                        }
                    }
                }
            }
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| Error::Parse {
                line: line_no,
                message: format!("unterminated section header '{}'", trimmed),
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Parse {
                    line: line_no,
                    message: "empty section name".to_string(),
                });
            }
            if sections.iter().any(|s| s.name == name) {
                return Err(Error::DuplicateSection {
                    section: name.to_string(),
                    line: line_no,
                });
            }
            sections.push(Section {
                name: name.to_string(),
                line: line_no,
                entries: Vec::new(),
            });
            continue;
        }

        let section = sections.last_mut().ok_or_else(|| Error::Parse {
            line: line_no,
            message: "entry before the first section header".to_string(),
        })?;

        let (key, value) = match trimmed.find(|c: char| c == '=' || c == ':') {
            Some(pos) => (
                trimmed[..pos].trim_end(),
                Some(trimmed[pos + 1..].trim_start().to_string()),
            ),
            None => (trimmed, None),
        };

        if key.is_empty() {
            return Err(Error::Parse {
                line: line_no,
                message: format!("missing key in '{}'", trimmed),
            });
        }
        if section.entries.iter().any(|e| e.key == key) {
            return Err(Error::DuplicateOption {
                section: section.name.clone(),
                key: key.to_string(),
                line: line_no,
            });
        }

        section.entries.push(Entry {
            key: key.to_string(),
            value,
            line: line_no,
            indent,
        });
    }

    Ok(sections)
}

fn read_general(section: &Section) -> Result<GeneralSettings> {
    let mut general = GeneralSettings::default();

    for entry in &section.entries {
        let value = entry.value.clone().unwrap_or_default();
        match entry.key.as_str() {
            "engine" => general.engine = value,
            "kernel" => general.kernel = Some(value),
            "cmdline" => general.kernel_cmdline = Some(value),
            "mode" => general.mode = Some(value.parse()?),
            "gdb" => general.gdb = Some(parse_bool(&entry.key, &value)?),
            "gdb_dev" => general.gdb_dev = Some(value),
            "halted" => general.halted = Some(parse_bool(&entry.key, &value)?),
            "cpu" => general.cpu = Some(value),
            "memory" => general.memory = Some(value),
            other => match GENERAL_KEYS.iter().find(|known| known.eq_ignore_ascii_case(other)) {
                Some(known) => {
                    tracing::warn!(key = other, line = entry.line, expected = *known, "ignoring [general] key with wrong case");
                }
                None => {
                    tracing::debug!(key = other, line = entry.line, "ignoring unknown [general] key");
                }
            },
        }
    }

    Ok(general)
}

fn read_argument(section: &Section) -> Result<Argument> {
    let (name, id) = match section.name.split_once(':') {
        Some((name, id)) => (name, Some(id)),
        None => (section.name.as_str(), None),
    };

    let mut value = None;
    let mut attributes = Attributes::new();
    for entry in &section.entries {
        if entry.key == VALUE_KEY {
            value = entry.value.clone();
        } else {
            attributes.insert(entry.key.as_str(), entry.value.clone());
        }
    }
    if let Some(id) = id {
        attributes.insert(ID_KEY, Some(id.to_string()));
    }

    Argument::new(name, value, attributes).map_err(|e| match e {
        Error::EmptyName => Error::Parse {
            line: section.line,
            message: format!("section [{}] has no argument name", section.name),
        },
        other => other,
    })
}

/// Parse an INI boolean token.
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(Error::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Section name for an argument: `name` or `name:id`.
pub fn section_name(argument: &Argument) -> String {
    match argument.id_value() {
        Some(id) => format!("{}:{}", argument.name(), id),
        None => argument.name().to_string(),
    }
}

/// Write a layer back to text that [`parse_layer`] reads as an equal layer.
pub fn serialize_layer(layer: &Layer) -> Result<String> {
    let mut out = String::new();
    let general = layer.general();

    if !general.is_empty() {
        out.push_str("[general]\n");
        if !general.engine.is_empty() {
            check_value(GENERAL_SECTION, &general.engine)?;
            push_entry(&mut out, "engine", Some(&general.engine));
        }
        if let Some(mode) = general.mode {
            push_entry(&mut out, "mode", Some(mode.as_str()));
        }
        let optional = [
            ("kernel", general.kernel.as_deref()),
            ("cmdline", general.kernel_cmdline.as_deref()),
            ("gdb", general.gdb.map(yes_no)),
            ("gdb_dev", general.gdb_dev.as_deref()),
            ("halted", general.halted.map(yes_no)),
            ("cpu", general.cpu.as_deref()),
            ("memory", general.memory.as_deref()),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                check_value(GENERAL_SECTION, value)?;
                push_entry(&mut out, key, Some(value));
            }
        }
    }

    let mut seen: Vec<String> = Vec::new();
    for argument in layer.arguments() {
        let section = section_name(argument);
        check_section(argument, &section, &seen)?;

        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "[{}]", section);
        if let Some(value) = argument.value() {
            check_value(&section, value)?;
            push_entry(&mut out, VALUE_KEY, Some(value));
        }
        for (key, value) in argument.attributes().iter() {
            if key == ID_KEY {
                continue;
            }
            check_key(&section, key)?;
            if let Some(value) = value {
                check_value(&section, value)?;
            }
            push_entry(&mut out, key, value);
        }
        seen.push(section);
    }

    Ok(out)
}

fn unrepresentable(section: &str, reason: String) -> Error {
    Error::UnrepresentableLayer {
        section: section.to_string(),
        reason,
    }
}

fn has_edge_whitespace(text: &str) -> bool {
    text.trim() != text
}

fn check_section(argument: &Argument, section: &str, seen: &[String]) -> Result<()> {
    let name = argument.name();
    if section == GENERAL_SECTION {
        return Err(unrepresentable(section, "is reserved for general settings".to_string()));
    }
    if seen.iter().any(|s| s == section) {
        return Err(unrepresentable(section, "would appear twice".to_string()));
    }
    if name.contains(':') {
        return Err(unrepresentable(section, format!("has ':' in argument name '{}'", name)));
    }
    if section.contains('\n') || has_edge_whitespace(name) || argument.id_value().is_some_and(has_edge_whitespace) {
        return Err(unrepresentable(section, "has whitespace the parser would trim".to_string()));
    }
    Ok(())
}

fn check_key(section: &str, key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("has an empty key".to_string())
    } else if key == VALUE_KEY {
        Some(format!("has an attribute named '{}'", VALUE_KEY))
    } else if key.contains(|c: char| c == '=' || c == ':') {
        Some(format!("has a delimiter in key '{}'", key))
    } else if key.starts_with(|c: char| c == '[' || c == '#' || c == ';') {
        Some(format!("has key '{}' that reads as a header or comment", key))
    } else if key.contains('\n') || has_edge_whitespace(key) {
        Some(format!("has whitespace the parser would trim in key '{}'", key))
    } else {
        None
    };
    reason.map_or(Ok(()), |reason| Err(unrepresentable(section, reason)))
}

fn check_value(section: &str, value: &str) -> Result<()> {
    for (idx, piece) in value.split('\n').enumerate() {
        let continuation = idx > 0;
        if has_edge_whitespace(piece) {
            return Err(unrepresentable(section, format!("has whitespace the parser would trim in '{}'", value)));
        }
        if continuation && (piece.is_empty() || piece.starts_with(|c: char| c == '#' || c == ';')) {
            return Err(unrepresentable(section, format!("has a blank or comment continuation line in '{}'", value)));
        }
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn push_entry(out: &mut String, key: &str, value: Option<&str>) {
    match value {
        None => {
            let _ = writeln!(out, "{}", key);
        }
        // Multi-line values are written as indented continuation lines
        Some(value) => {
            let mut lines = value.split('\n');
            let _ = writeln!(out, "{} = {}", key, lines.next().unwrap_or_default());
            for line in lines {
                let _ = writeln!(out, "    {}", line);
            }
        }
    }
}
