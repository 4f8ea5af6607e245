//! Backquote rewriting: turn `(backquote form)` into ordinary code
//! built from `quote`, `list`, and `append`, honoring nesting and
//! `unquote` / `unquote-splicing`.

use sylva_core::{SylvaError, Value};

fn head_is(form: &Value, name: &str) -> bool {
    form.has_head(name)
}

fn second(form: &Value) -> Value {
    form.cdr().car()
}

/// True when the form contains an unquote that would fire at depth 0.
fn has_active_unquote(form: &Value, depth: usize) -> bool {
    match form.as_cons() {
        None => false,
        Some(_) => {
            if head_is(form, "unquote") || head_is(form, "unquote-splicing") {
                return depth == 0 || has_active_unquote(&second(form), depth - 1);
            }
            if head_is(form, "backquote") {
                return has_active_unquote(&second(form), depth + 1);
            }
            let mut cursor = form.clone();
            while let Some(c) = cursor.as_cons() {
                let (car, cdr) = (c.car.clone(), c.cdr.clone());
                if has_active_unquote(&car, depth) {
                    return true;
                }
                // A dotted (a . ,b) tail is itself an unquote form.
                if head_is(&cdr, "unquote") && depth == 0 {
                    return true;
                }
                cursor = cdr;
            }
            false
        }
    }
}

/// Rewrite the argument of a `backquote` form.
pub fn expand_backquote(form: &Value) -> Result<Value, SylvaError> {
    expand(form, 0)
}

fn quote(form: Value) -> Value {
    Value::list(vec![Value::symbol("quote"), form])
}

fn expand(form: &Value, depth: usize) -> Result<Value, SylvaError> {
    if form.as_cons().is_none() {
        return Ok(quote(form.clone()));
    }
    if head_is(form, "unquote") {
        if depth == 0 {
            return Ok(second(form));
        }
        return Ok(Value::list(vec![
            Value::symbol("list"),
            quote(Value::symbol("unquote")),
            expand(&second(form), depth - 1)?,
        ]));
    }
    if head_is(form, "unquote-splicing") {
        if depth == 0 {
            return Err(SylvaError::compile("`,@` outside of a list"));
        }
        return Ok(Value::list(vec![
            Value::symbol("list"),
            quote(Value::symbol("unquote-splicing")),
            expand(&second(form), depth - 1)?,
        ]));
    }
    if head_is(form, "backquote") {
        return Ok(Value::list(vec![
            Value::symbol("list"),
            quote(Value::symbol("backquote")),
            expand(&second(form), depth + 1)?,
        ]));
    }
    if !has_active_unquote(form, depth) {
        return Ok(quote(form.clone()));
    }
    expand_list(form, depth)
}

/// Build `(append frag… tail)` for a (possibly dotted) template list.
fn expand_list(form: &Value, depth: usize) -> Result<Value, SylvaError> {
    let mut fragments = Vec::new();
    let mut splicing = false;
    let mut cursor = form.clone();
    let tail;
    loop {
        match cursor.as_cons() {
            None => {
                tail = quote(cursor.clone());
                break;
            }
            Some(c) => {
                let (car, cdr) = (c.car.clone(), c.cdr.clone());
                // `(a . ,b)`: an unquote in tail position ends the walk.
                if head_is(&cursor, "unquote") && depth == 0 {
                    tail = second(&cursor);
                    break;
                }
                if head_is(&car, "unquote-splicing") && depth == 0 {
                    fragments.push(second(&car));
                    splicing = true;
                } else {
                    fragments.push(Value::list(vec![
                        Value::symbol("list"),
                        expand(&car, depth)?,
                    ]));
                }
                cursor = cdr;
            }
        }
    }

    // Without splicing the fragments are all single-element lists, so
    // collapse `(append (list a) (list b))` into `(list a b)`.
    if !splicing && tail == quote(Value::Nil) {
        let mut items = vec![Value::symbol("list")];
        for frag in fragments {
            items.push(second(&frag));
        }
        return Ok(Value::list(items));
    }

    let mut items = vec![Value::symbol("append")];
    items.extend(fragments);
    items.push(tail);
    Ok(Value::list(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bq(items: Vec<Value>) -> Value {
        Value::list(items)
    }

    #[test]
    fn test_constant_template_quotes() {
        let form = bq(vec![Value::symbol("a"), Value::int(1)]);
        let out = expand_backquote(&form).unwrap();
        assert_eq!(out.to_string(), "(quote (a 1))");
    }

    #[test]
    fn test_unquote() {
        // `(a ,b) => (list 'a b)
        let form = bq(vec![
            Value::symbol("a"),
            bq(vec![Value::symbol("unquote"), Value::symbol("b")]),
        ]);
        let out = expand_backquote(&form).unwrap();
        assert_eq!(out.to_string(), "(list (quote a) b)");
    }

    #[test]
    fn test_splicing_uses_append() {
        // `(a ,@b c) => (append (list 'a) b (list 'c) 'nil)
        let form = bq(vec![
            Value::symbol("a"),
            bq(vec![Value::symbol("unquote-splicing"), Value::symbol("b")]),
            Value::symbol("c"),
        ]);
        let out = expand_backquote(&form).unwrap();
        assert!(out.has_head("append"), "got {out}");
    }

    #[test]
    fn test_top_level_unquote() {
        let form = bq(vec![Value::symbol("unquote"), Value::symbol("x")]);
        assert_eq!(expand_backquote(&form).unwrap(), Value::symbol("x"));
    }

    #[test]
    fn test_nested_backquote_stays_quoted() {
        // ``(a ,b) keeps the inner unquote un-fired.
        let inner = bq(vec![
            Value::symbol("a"),
            bq(vec![Value::symbol("unquote"), Value::symbol("b")]),
        ]);
        let form = bq(vec![Value::symbol("backquote"), inner]);
        let out = expand_backquote(&form).unwrap();
        assert!(out.has_head("list"), "got {out}");
    }

    #[test]
    fn test_splicing_at_top_errors() {
        let form = bq(vec![Value::symbol("unquote-splicing"), Value::symbol("x")]);
        assert!(expand_backquote(&form).is_err());
    }
}
