use super::{check_arity, for_each_matching, AddressPattern, Node};
use crate::error::{Error, Result};
use crate::message::MessageRequest;
use regex::Regex;

/// Rewrites the address of matching messages with a regex substitution.
///
/// The substitution is unanchored and replaces every occurrence.
/// In the replacement `$1` and `${name}` insert groups and `\$` is a
/// literal dollar sign.
#[derive(Debug, Default)]
pub struct RenameNode {
    pattern: AddressPattern,
    search: Option<Regex>,
    replacement: String,
    expanded: String,
}

impl RenameNode {
    fn rewrite(&self, address: &str) -> String {
        match &self.search {
            Some(re) => re.replace_all(address, self.expanded.as_str()).into_owned(),
            None => address.to_string(),
        }
    }
}

/// Translate a replacement string into `regex` syntax for a pattern with
/// `groups` capture groups.
///
/// A group number takes the first digit after `$`, then keeps consuming
/// digits only while the result still names an existing group, so `$12`
/// with one group is group 1 followed by a literal `2`.
fn expand_group_refs(replacement: &str, groups: usize) -> Result<String> {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('$') => out.push_str("$$"),
                Some(escaped) => out.push(escaped),
                None => return Err(Error::config("Rename: trailing '\\' in replacement")),
            },
            '$' => match chars.next() {
                Some('{') => {
                    let name: String = chars.by_ref().take_while(|&n| n != '}').collect();
                    if name.is_empty() {
                        return Err(Error::config("Rename: empty group name in replacement"));
                    }
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut number = d.to_digit(10).unwrap_or_default() as usize;
                    if number > groups {
                        return Err(Error::config(format!(
                            "Rename: no group {} in replacement",
                            number
                        )));
                    }
                    while let Some(next) = chars.peek().and_then(|n| n.to_digit(10)) {
                        let longer = number * 10 + next as usize;
                        if longer > groups {
                            break;
                        }
                        number = longer;
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", number));
                }
                _ => {
                    return Err(Error::config(
                        "Rename: '$' must be followed by a group reference",
                    ))
                }
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

impl Node for RenameNode {
    fn type_name(&self) -> &'static str {
        "rename"
    }

    fn label(&self) -> &'static str {
        "Rename"
    }

    fn help(&self) -> String {
        match &self.search {
            Some(re) => format!("Renames addresses: {} -> {}", re.as_str(), self.replacement),
            None => "Renames matching addresses with a regex substitution".to_string(),
        }
    }

    fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    fn process(&self, requests: &mut Vec<MessageRequest>) {
        for_each_matching(requests, &self.pattern, |req, out| {
            let address = self.rewrite(req.address());
            out.push(req.derive(req.message.with_address(address)));
        });
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["Address Pattern", "Replacement Regex", "Replacement"]
    }

    fn configure(&mut self, args: &[String]) -> Result<()> {
        check_arity("Rename", args, 3)?;
        let pattern = AddressPattern::new(&args[0])?;
        let search = Regex::new(&args[1])?;
        self.expanded = expand_group_refs(&args[2], search.captures_len() - 1)?;
        self.pattern = pattern;
        self.search = Some(search);
        self.replacement = args[2].clone();
        Ok(())
    }

    fn args(&self) -> Vec<String> {
        vec![
            self.pattern.as_str().to_string(),
            self.search
                .as_ref()
                .map(|re| re.as_str().to_string())
                .unwrap_or_default(),
            self.replacement.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OscValue;
    use crate::nodes::test_util::*;

    fn node(args: &[&str]) -> RenameNode {
        let mut n = RenameNode::default();
        n.configure(&strings(args)).unwrap();
        n
    }

    #[test]
    fn test_simple_rename() {
        let mut list = req("/old/path", vec![OscValue::Int32(1)]);
        node(&["/old/.*", "/old/", "/new/"]).process(&mut list);
        assert_eq!(list[0].address(), "/new/path");
        assert_eq!(list[0].message.args(), &[OscValue::Int32(1)]);
    }

    #[test]
    fn test_group_references() {
        let mut list = req("/synth/3/freq", vec![]);
        node(&["/synth/.*", "/synth/([0-9]+)/(\\w+)", "/voice$1/$2"]).process(&mut list);
        assert_eq!(list[0].address(), "/voice3/freq");
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let mut list = req("/a/a/b", vec![]);
        node(&[".*", "a", "x"]).process(&mut list);
        assert_eq!(list[0].address(), "/x/x/b");
    }

    #[test]
    fn test_non_matching_untouched() {
        let mut list = req("/other", vec![]);
        node(&["/old/.*", "old", "new"]).process(&mut list);
        assert_eq!(list[0].address(), "/other");
    }

    #[test]
    fn test_args_round_trip() {
        let n = node(&["/a", "b", "c"]);
        assert_eq!(n.args(), strings(&["/a", "b", "c"]));
    }

    #[test]
    fn test_expand_group_refs() {
        assert_eq!(expand_group_refs("$1x$2", 2).unwrap(), "${1}x${2}");
        assert_eq!(expand_group_refs("$12", 1).unwrap(), "${1}2");
        assert_eq!(expand_group_refs("$12", 12).unwrap(), "${12}");
        assert_eq!(expand_group_refs("${tail}", 1).unwrap(), "${tail}");
        assert_eq!(expand_group_refs("\\$5 \\\\", 0).unwrap(), "$$5 \\");
        assert!(expand_group_refs("$3", 2).is_err());
        assert!(expand_group_refs("$x", 2).is_err());
    }

    #[test]
    fn test_group_number_stops_at_existing_group() {
        let mut list = req("/ch/7", vec![]);
        node(&["/ch/.*", "/ch/([0-9])", "/out/$12"]).process(&mut list);
        assert_eq!(list[0].address(), "/out/72");
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        let mut list = req("/price", vec![]);
        node(&[".*", "/price", "/cost\\$1"]).process(&mut list);
        assert_eq!(list[0].address(), "/cost$1");
    }

    #[test]
    fn test_missing_group_fails_configure() {
        let mut n = RenameNode::default();
        let err = n.configure(&strings(&[".*", "(a)", "$2"])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
