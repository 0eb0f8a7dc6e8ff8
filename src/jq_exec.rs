//! jq pre-filter for documents (e.g. strip vendor extensions, pick one
//! document out of a bundle) before generation starts.
use anyhow::{anyhow, Context, Result};
use jaq_core::{compile::Undefined, load, Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde_json::Value;

/// Run `filter_src` over `input`, returning every output in order.
pub fn apply_filter(filter_src: &str, input: &Value) -> Result<Vec<Value>> {
    let loader = load::Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = load::Arena::default();
    let program = load::File { code: filter_src, path: () };

    let modules = loader
        .load(&arena, program)
        .map_err(format_parse_errors)?;

    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(format_undefined_errors)?;

    let inputs = RcIter::new(core::iter::empty());
    let mut it = filter.run((Ctx::new([], &inputs), Val::from(input.clone())));

    let mut out = Vec::new();
    while let Some(item) = it.next() {
        let v = item.map_err(|e| anyhow!("{e:?}"))?;
        // Val renders as JSON text; re-parse to keep key order under preserve_order.
        let text = format!("{v}");
        let value = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("jq output is not JSON: {text}"))?;
        out.push(value);
    }
    Ok(out)
}

fn format_parse_errors(
    errs: Vec<(load::File<&str, ()>, load::Error<&str>)>,
) -> anyhow::Error {
    let lines: Vec<String> = errs
        .into_iter()
        .map(|(file, err)| format!("parse error: {err:?} in `{}`", file.code))
        .collect();
    anyhow!(lines.join("\n"))
}

fn format_undefined_errors(
    errs: Vec<(load::File<&str, ()>, Vec<(&str, Undefined)>)>,
) -> anyhow::Error {
    let lines: Vec<String> = errs
        .into_iter()
        .flat_map(|(file, list)| {
            list.into_iter()
                .map(move |(name, undef)| format!("undefined `{name}`: {undef:?} in `{}`", file.code))
        })
        .collect();
    anyhow!(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_outputs_are_returned_in_order() {
        let input = json!({"specs": [{"openapi": "3.0.0"}, {"openapi": "3.1.0"}]});
        let out = apply_filter(".specs[]", &input).unwrap();
        assert_eq!(out, vec![json!({"openapi": "3.0.0"}), json!({"openapi": "3.1.0"})]);
    }

    #[test]
    fn filter_can_drop_paths() {
        let input = json!({"openapi": "3.0.0", "paths": {"/a": {}, "/internal": {}}});
        let out = apply_filter("del(.paths[\"/internal\"])", &input).unwrap();
        assert_eq!(out[0]["paths"], json!({"/a": {}}));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(apply_filter(".[", &json!({})).is_err());
    }
}
