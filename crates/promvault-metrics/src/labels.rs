//! Label-set identity and rendering.

use std::fmt::Write as _;

use promvault_core::LabelSet;

/// Stable identity of a label-set.
///
/// Pairs are emitted in key order with both halves quoted and escaped, so the
/// key is independent of insertion order and two distinct label-sets can never
/// produce the same key. The empty set maps to the empty string.
pub fn canonical_key(labels: &LabelSet) -> String {
    let mut key = String::new();
    for (i, (name, value)) in labels.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        let _ = write!(key, "\"{}\"=\"{}\"", escape(name), escape(value));
    }
    key
}

/// Render `{k="v",...}` for exposition, with `extra` pairs (e.g. `le`) first.
/// Returns an empty string when there is nothing to render.
pub fn render_labels(labels: &LabelSet, extra: &[(&str, &str)]) -> String {
    if labels.is_empty() && extra.is_empty() {
        return String::new();
    }
    let mut buf = String::from("{");
    let pairs = extra.iter().copied().chain(labels.iter());
    for (i, (name, value)) in pairs.enumerate() {
        if i > 0 {
            buf.push(',');
        }
        let _ = write!(buf, "{}=\"{}\"", name, escape(value));
    }
    buf.push('}');
    buf
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_labels_have_empty_key() {
        assert_eq!(canonical_key(&LabelSet::new()), "");
        assert_eq!(render_labels(&LabelSet::new(), &[]), "");
    }

    #[test]
    fn key_is_order_independent() {
        let a: LabelSet = [("b", "2"), ("a", "1")].into();
        let b: LabelSet = [("a", "1"), ("b", "2")].into();
        assert_eq!(canonical_key(&a), canonical_key(&b));
        assert_eq!(canonical_key(&a), r#""a"="1","b"="2""#);
    }

    #[test]
    fn key_does_not_collide_on_separators() {
        let a: LabelSet = [("a", "1\",\"b\"=\"2")].into();
        let b: LabelSet = [("a", "1"), ("b", "2")].into();
        assert_ne!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn render_escapes_values() {
        let labels: LabelSet = [("path", "C:\\dir"), ("msg", "say \"hi\"\n")].into();
        assert_eq!(
            render_labels(&labels, &[]),
            r#"{msg="say \"hi\"\n",path="C:\\dir"}"#
        );
    }

    #[test]
    fn render_puts_extra_pairs_first() {
        let labels: LabelSet = [("method", "GET")].into();
        assert_eq!(
            render_labels(&labels, &[("le", "50")]),
            r#"{le="50",method="GET"}"#
        );
        assert_eq!(render_labels(&LabelSet::new(), &[("le", "+Inf")]), r#"{le="+Inf"}"#);
    }
}
