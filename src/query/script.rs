//! Server-side script support: storage-name substitution in caller code and
//! the builtin aggregation scripts used by the cursor helpers.

use regex::{Captures, Regex};
use std::sync::{Arc, LazyLock};

use crate::errors::OdmError;
use crate::schema::DocumentSchema;

use super::path::resolve_field_name;

/// Marker that introduces a logical field path inside script text.
pub const FIELD_MARKER: char = '~';

// `[~comments.content]` -> `["cs.c"]`
static ITEM_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*~([A-Za-z_][A-Za-z_0-9.]*?)\s*\]").expect("field marker pattern")
});

// `{{~comments.content}}` -> `"cs.c"`
static PATH_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*~([A-Za-z_][A-Za-z_0-9.]*?)\s*\}\}").expect("field marker pattern")
});

fn substitute(
    re: &Regex,
    code: &str,
    mut replace: impl FnMut(&Captures<'_>) -> Result<String, OdmError>,
) -> Result<String, OdmError> {
    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for caps in re.captures_iter(code) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&code[last..m.start()]);
        out.push_str(&replace(&caps)?);
        last = m.end();
    }
    out.push_str(&code[last..]);
    Ok(out)
}

fn storage_literal(schema: &Arc<DocumentSchema>, caps: &Captures<'_>) -> Result<String, OdmError> {
    let path = resolve_field_name(schema, &caps[1])?;
    Ok(serde_json::to_string(&path.storage_key())?)
}

/// Replace marker-prefixed field paths with storage names as string literals.
///
/// The rewrite is lexical; the surrounding script is not parsed.
///
/// # Errors
/// `UnresolvedField` when a marked path is not declared on `schema`.
pub fn translate_fields(schema: &Arc<DocumentSchema>, code: &str) -> Result<String, OdmError> {
    if !code.contains(FIELD_MARKER) {
        return Ok(code.to_owned());
    }
    let code = substitute(&ITEM_ACCESS, code, |caps| Ok(format!("[{}]", storage_literal(schema, caps)?)))?;
    substitute(&PATH_LITERAL, &code, |caps| storage_literal(schema, caps))
}

// Shared path lookup so dotted storage paths work inside the builtins.
const GET_PATH_JS: &str = r"
    function getPath(doc, path) {
        return path.split('.').reduce(function(o, k) {
            return (o === undefined || o === null) ? undefined : o[k];
        }, doc);
    }";

/// Sum of a numeric field over the matching documents; absent values count as zero.
#[must_use]
pub fn sum_script() -> String {
    format!(
        r"function(sumField) {{{GET_PATH_JS}
    var total = 0.0;
    db[collection].find(query).forEach(function(doc) {{
        total += (getPath(doc, sumField) || 0.0);
    }});
    return total;
}}"
    )
}

/// Total and number of documents carrying the field; the mean is taken client-side.
#[must_use]
pub fn average_script() -> String {
    format!(
        r"function(averageField) {{{GET_PATH_JS}
    var total = 0.0;
    var num = 0;
    db[collection].find(query).forEach(function(doc) {{
        var value = getPath(doc, averageField);
        if (value !== undefined && value !== null) {{
            total += value;
            num += 1;
        }}
    }});
    return {{total: total, count: num}};
}}"
    )
}

/// Raw occurrence counts of each list item (or scalar value) of a field.
#[must_use]
pub fn item_frequencies_script() -> String {
    format!(
        r"function(field) {{{GET_PATH_JS}
    var frequencies = {{}};
    db[collection].find(query).forEach(function(doc) {{
        var value = getPath(doc, field);
        if (value === undefined || value === null) {{
            return;
        }}
        var items = Array.isArray(value) ? value : [value];
        items.forEach(function(item) {{
            frequencies[item] = 1 + (frequencies[item] || 0);
        }});
    }});
    return frequencies;
}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn schema() -> Arc<DocumentSchema> {
        let comment = DocumentSchema::embedded("Comment").field(FieldDef::new("content").db_field("c")).build();
        DocumentSchema::builder("BlogPost")
            .field(FieldDef::new("title").db_field("t"))
            .field(FieldDef::embedded_list("comments", comment).db_field("cs"))
            .build()
    }

    #[test]
    fn item_access_and_path_literals_are_rewritten() {
        let code = "doc[~title] + doc[ ~comments.content ] + {{~comments.content}}";
        let out = translate_fields(&schema(), code).unwrap();
        assert_eq!(out, r#"doc["t"] + doc["cs.c"] + "cs.c""#);
    }

    #[test]
    fn code_without_marker_is_untouched() {
        let code = "function() { return ~~x; }";
        assert_eq!(translate_fields(&schema(), code).unwrap(), code);
        let code = "function() { return db[collection].count(); }";
        assert_eq!(translate_fields(&schema(), code).unwrap(), code);
    }

    #[test]
    fn unknown_marked_path_fails() {
        let err = translate_fields(&schema(), "doc[~comments.body]").unwrap_err();
        assert!(matches!(err, OdmError::UnresolvedField { segment, .. } if segment == "body"));
    }

    #[test]
    fn builtins_are_functions() {
        for s in [sum_script(), average_script(), item_frequencies_script()] {
            assert!(s.starts_with("function("));
            assert!(s.contains("db[collection].find(query)"));
            assert!(s.trim_end().ends_with('}'));
        }
    }
}
