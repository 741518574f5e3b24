//! Minimal S-expression reader for solver responses.

use crate::terms::SmtTerm;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub(crate) fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(a) => Some(a),
            Sexp::List(_) => None,
        }
    }
}

/// Net parenthesis depth of `text`, ignoring quoted symbols, strings and
/// comments. Used to decide whether a multi-line response is complete.
pub(crate) fn paren_balance(text: &str) -> i64 {
    let mut depth = 0i64;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '|' => {
                for q in chars.by_ref() {
                    if q == '|' {
                        break;
                    }
                }
            }
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            ';' => {
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    depth
}

/// Parse every top-level S-expression in `input`.
pub(crate) fn parse_all(input: &str) -> Result<Vec<Sexp>, String> {
    let mut stack: Vec<Vec<Sexp>> = vec![Vec::new()];
    let mut atom = String::new();
    let mut chars = input.chars().peekable();

    fn flush(atom: &mut String, stack: &mut [Vec<Sexp>]) {
        if !atom.is_empty() {
            if let Some(top) = stack.last_mut() {
                top.push(Sexp::Atom(std::mem::take(atom)));
            }
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '(' => {
                flush(&mut atom, &mut stack);
                stack.push(Vec::new());
            }
            ')' => {
                flush(&mut atom, &mut stack);
                let done = stack.pop().ok_or("unbalanced `)`")?;
                let parent = stack.last_mut().ok_or("unbalanced `)`")?;
                parent.push(Sexp::List(done));
            }
            '|' => {
                flush(&mut atom, &mut stack);
                let mut quoted = String::new();
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == '|' {
                        closed = true;
                        break;
                    }
                    quoted.push(q);
                }
                if !closed {
                    return Err("unterminated quoted symbol".into());
                }
                if let Some(top) = stack.last_mut() {
                    top.push(Sexp::Atom(quoted));
                }
            }
            '"' => {
                flush(&mut atom, &mut stack);
                let mut text = String::from('"');
                for q in chars.by_ref() {
                    text.push(q);
                    if q == '"' {
                        break;
                    }
                }
                if let Some(top) = stack.last_mut() {
                    top.push(Sexp::Atom(text));
                }
            }
            ';' => {
                flush(&mut atom, &mut stack);
                while let Some(&q) = chars.peek() {
                    if q == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            c if c.is_whitespace() => flush(&mut atom, &mut stack),
            other => atom.push(other),
        }
    }
    flush(&mut atom, &mut stack);
    if stack.len() != 1 {
        return Err("unbalanced `(`".into());
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Convert a solver-printed term back into an [`SmtTerm`].
pub(crate) fn to_term(sexp: &Sexp) -> Result<SmtTerm, String> {
    let mut env = Vec::new();
    to_term_in(sexp, &mut env)
}

fn to_term_in(sexp: &Sexp, env: &mut Vec<(String, SmtTerm)>) -> Result<SmtTerm, String> {
    let items = match sexp {
        Sexp::Atom(atom) => return Ok(atom_to_term(atom, env)),
        Sexp::List(items) => items,
    };
    let (head, args) = items.split_first().ok_or("empty application")?;
    let op = head
        .as_atom()
        .ok_or_else(|| format!("unsupported operator `{head:?}`"))?;

    if op == "let" {
        return let_to_term(args, env);
    }
    if op == "!" {
        let body = args.first().ok_or("empty annotation")?;
        return to_term_in(body, env);
    }

    let mut terms = Vec::with_capacity(args.len());
    for arg in args {
        terms.push(to_term_in(arg, env)?);
    }

    let binary = |terms: Vec<SmtTerm>| -> Result<(SmtTerm, SmtTerm), String> {
        let mut it = terms.into_iter();
        match (it.next(), it.next(), it.next()) {
            (Some(l), Some(r), None) => Ok((l, r)),
            _ => Err(format!("`{op}` expects two arguments")),
        }
    };

    match op {
        "and" => Ok(SmtTerm::And(terms)),
        "or" => Ok(SmtTerm::Or(terms)),
        "not" => {
            let mut it = terms.into_iter();
            match (it.next(), it.next()) {
                (Some(t), None) => Ok(t.not()),
                _ => Err("`not` expects one argument".into()),
            }
        }
        "=>" => {
            let mut it = terms.into_iter().rev();
            let last = it.next().ok_or("`=>` without arguments")?;
            Ok(it.fold(last, |acc, t| t.implies(acc)))
        }
        "-" if terms.len() == 1 => match terms.into_iter().next() {
            Some(SmtTerm::IntLit(n)) => Ok(SmtTerm::int(n.checked_neg().ok_or("literal overflow")?)),
            Some(t) => Ok(SmtTerm::int(0).sub(t)),
            None => Err("`-` without arguments".into()),
        },
        "+" | "-" | "*" => {
            let mut it = terms.into_iter();
            let first = it.next().ok_or_else(|| format!("`{op}` without arguments"))?;
            Ok(it.fold(first, |acc, t| match op {
                "+" => acc.add(t),
                "-" => acc.sub(t),
                _ => acc.mul(t),
            }))
        }
        "=" => {
            if terms.len() < 2 {
                return Err("`=` expects at least two arguments".into());
            }
            let pairs: Vec<SmtTerm> = terms
                .windows(2)
                .map(|w| w[0].clone().eq(w[1].clone()))
                .collect();
            Ok(SmtTerm::conjunction(pairs))
        }
        "<" => binary(terms).map(|(l, r)| l.lt(r)),
        "<=" => binary(terms).map(|(l, r)| l.le(r)),
        ">" => binary(terms).map(|(l, r)| l.gt(r)),
        ">=" => binary(terms).map(|(l, r)| l.ge(r)),
        "ite" => {
            let mut it = terms.into_iter();
            match (it.next(), it.next(), it.next(), it.next()) {
                (Some(c), Some(t), Some(e), None) => Ok(SmtTerm::ite(c, t, e)),
                _ => Err("`ite` expects three arguments".into()),
            }
        }
        other => Err(format!("unsupported operator `{other}`")),
    }
}

fn atom_to_term(atom: &str, env: &[(String, SmtTerm)]) -> SmtTerm {
    if let Some((_, bound)) = env.iter().rev().find(|(name, _)| name == atom) {
        return bound.clone();
    }
    match atom {
        "true" => SmtTerm::bool(true),
        "false" => SmtTerm::bool(false),
        _ => match atom.parse::<i64>() {
            Ok(n) if atom.chars().all(|c| c.is_ascii_digit()) => SmtTerm::int(n),
            _ => SmtTerm::var(atom),
        },
    }
}

fn let_to_term(args: &[Sexp], env: &mut Vec<(String, SmtTerm)>) -> Result<SmtTerm, String> {
    let (bindings, body) = match args {
        [Sexp::List(bindings), body] => (bindings, body),
        _ => return Err("malformed `let`".into()),
    };
    // Bindings are parallel: evaluate all of them in the outer environment.
    let mut bound = Vec::with_capacity(bindings.len());
    for binding in bindings {
        match binding {
            Sexp::List(pair) if pair.len() == 2 => {
                let name = pair[0].as_atom().ok_or("malformed `let` binding")?;
                bound.push((name.to_string(), to_term_in(&pair[1], env)?));
            }
            _ => return Err("malformed `let` binding".into()),
        }
    }
    let depth = env.len();
    env.extend(bound);
    let result = to_term_in(body, env);
    env.truncate(depth);
    result
}
