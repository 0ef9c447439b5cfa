//! Parser for the textual query language.
//!
//! ```text
//! plan      := for | union(plan, ...) | intersect(plan, ...) | difference(plan, plan)
//! for       := "for" VAR ("in" | "inevery") source ["where" predicate]
//! source    := "kind/path" | $n | $n.attr | item("uuid").attr | index("name")
//! predicate := disjunctions of conjunctions of [not] primary
//! primary   := (predicate) | True | False | operand OP operand
//!            | contains(operand, operand) | matches(operand, "regex") | has(VAR.attr)
//! operand   := VAR.attr | VAR.itsName | len(operand) | $n | "text" | 42 | 1.5 | @millis | True | False
//! ```
//!
//! `in` selects items of exactly the named kind, `inevery` includes
//! sub-kinds. Strings use either quote style and cannot contain their own
//! delimiter.

use crate::model::value::Value;
use crate::query::plan::{ItemRef, Query, QueryPlan, QuerySource};
use crate::query::predicate::{CompareOp, Operand, Predicate};
use crate::query::QueryError;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, cut, map, map_res, not, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use uuid::Uuid;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Parses `text` into a plan.
///
/// # Errors
/// - `QueryError::Parse` naming the offset where parsing stopped.
pub fn parse_query(text: &str) -> Result<QueryPlan, QueryError> {
    match all_consuming(delimited(multispace0, plan, multispace0))(text) {
        Ok((_, plan)) => Ok(plan),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(QueryError::Parse {
            query: text.to_string(),
            message: describe(text, &err),
        }),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse {
            query: text.to_string(),
            message: "incomplete input".to_string(),
        }),
    }
}

fn describe(text: &str, err: &VerboseError<&str>) -> String {
    let Some((remaining, _)) = err.errors.first() else {
        return "invalid query".to_string();
    };
    let offset = text.len() - remaining.len();
    let near: String = remaining.chars().take(16).collect();
    let expected = err.errors.iter().find_map(|(_, kind)| match kind {
        VerboseErrorKind::Context(label) => Some(*label),
        _ => None,
    });
    match expected {
        Some(label) => format!("expected {label} at offset {offset} near `{near}`"),
        None => format!("unexpected input at offset {offset} near `{near}`"),
    }
}

// ---- plans ----------------------------------------------------------------

fn plan(input: &str) -> PResult<'_, QueryPlan> {
    alt((
        map(preceded(keyword("union"), plan_list), QueryPlan::Union),
        map(preceded(keyword("intersect"), plan_list), QueryPlan::Intersect),
        map(
            preceded(
                keyword("difference"),
                parenthesised(separated_pair(plan, symbol(','), plan)),
            ),
            |(left, right)| QueryPlan::Difference(Box::new(left), Box::new(right)),
        ),
        map(for_clause, QueryPlan::For),
    ))(input)
}

fn plan_list(input: &str) -> PResult<'_, Vec<QueryPlan>> {
    parenthesised(separated_list1(symbol(','), plan))(input)
}

fn for_clause(input: &str) -> PResult<'_, Query> {
    let (input, _) = keyword("for")(input)?;
    let (input, var) = cut(context("loop variable", ws(identifier)))(input)?;
    let (input, recursive) = cut(context(
        "`in` or `inevery`",
        alt((value(true, keyword("inevery")), value(false, keyword("in")))),
    ))(input)?;
    let (input, source) = cut(context("query source", |i| source(recursive, i)))(input)?;
    let (input, predicate) = opt(preceded(keyword("where"), cut(|i| or_expr(var, i))))(input)?;
    Ok((
        input,
        Query::new(source, predicate.unwrap_or(Predicate::True)),
    ))
}

fn source(recursive: bool, input: &str) -> PResult<'_, QuerySource> {
    ws(alt((
        map(
            preceded(keyword("index"), parenthesised(quoted)),
            |name: &str| QuerySource::Index(name.to_string()),
        ),
        map(
            separated_pair(
                preceded(keyword("item"), parenthesised(item_id)),
                char('.'),
                identifier,
            ),
            |(id, attribute)| QuerySource::Refs {
                owner: ItemRef::Id(id),
                attribute: attribute.to_string(),
            },
        ),
        map(
            separated_pair(param, char('.'), identifier),
            |(index, attribute)| QuerySource::Refs {
                owner: ItemRef::Param(index),
                attribute: attribute.to_string(),
            },
        ),
        map(param, move |index| QuerySource::Param { index, recursive }),
        map(quoted, move |path: &str| QuerySource::Kind {
            path: path.to_string(),
            recursive,
        }),
    )))(input)
}

fn item_id(input: &str) -> PResult<'_, Uuid> {
    map_res(quoted, Uuid::parse_str)(input)
}

// ---- predicates -----------------------------------------------------------

fn or_expr<'a>(var: &str, input: &'a str) -> PResult<'a, Predicate> {
    let (input, first) = and_expr(var, input)?;
    let (input, rest) = many0(preceded(keyword("or"), |i: &'a str| and_expr(var, i)))(input)?;
    Ok((input, join(first, rest, Predicate::Or)))
}

fn and_expr<'a>(var: &str, input: &'a str) -> PResult<'a, Predicate> {
    let (input, first) = not_expr(var, input)?;
    let (input, rest) = many0(preceded(keyword("and"), |i: &'a str| not_expr(var, i)))(input)?;
    Ok((input, join(first, rest, Predicate::And)))
}

fn not_expr<'a>(var: &str, input: &'a str) -> PResult<'a, Predicate> {
    alt((
        map(
            preceded(keyword("not"), |i: &'a str| not_expr(var, i)),
            Predicate::negate,
        ),
        |i: &'a str| primary(var, i),
    ))(input)
}

fn primary<'a>(var: &str, input: &'a str) -> PResult<'a, Predicate> {
    alt((
        parenthesised(|i: &'a str| or_expr(var, i)),
        map(
            preceded(
                keyword("contains"),
                parenthesised(separated_pair(
                    |i: &'a str| operand(var, i),
                    symbol(','),
                    |i: &'a str| operand(var, i),
                )),
            ),
            |(haystack, needle)| Predicate::contains(haystack, needle),
        ),
        map(
            preceded(
                keyword("matches"),
                parenthesised(separated_pair(
                    |i: &'a str| operand(var, i),
                    symbol(','),
                    ws(quoted),
                )),
            ),
            |(operand, pattern)| Predicate::Matches(operand, pattern.to_string()),
        ),
        map(
            preceded(
                keyword("has"),
                parenthesised(|i: &'a str| attribute(var, i)),
            ),
            Predicate::Has,
        ),
        map(
            tuple((
                |i: &'a str| operand(var, i),
                ws(compare_op),
                cut(context("operand", |i: &'a str| operand(var, i))),
            )),
            |(left, op, right)| Predicate::compare(op, left, right),
        ),
        value(Predicate::True, keyword("True")),
        value(Predicate::False, keyword("False")),
    ))(input)
}

fn compare_op(input: &str) -> PResult<'_, CompareOp> {
    alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))(input)
}

fn operand<'a>(var: &str, input: &'a str) -> PResult<'a, Operand> {
    ws(alt((
        map(
            preceded(keyword("len"), parenthesised(|i: &'a str| operand(var, i))),
            Operand::len,
        ),
        |i: &'a str| attribute_operand(var, i),
        map(param, Operand::Param),
        map(quoted, |text: &str| Operand::literal(text)),
        map(number, Operand::Literal),
        map(preceded(char('@'), integer), |millis| {
            Operand::Literal(Value::DateTime(millis))
        }),
        value(Operand::literal(true), keyword("True")),
        value(Operand::literal(false), keyword("False")),
    )))(input)
}

fn attribute_operand<'a>(var: &str, input: &'a str) -> PResult<'a, Operand> {
    map(|i: &'a str| attribute(var, i), |name| {
        if name == "itsName" {
            Operand::ItsName
        } else {
            Operand::Attr(name)
        }
    })(input)
}

/// `VAR.name`; any other variable is a hard error.
fn attribute<'a>(var: &str, input: &'a str) -> PResult<'a, String> {
    let (rest, (name, attr)) = ws(separated_pair(identifier, char('.'), identifier))(input)?;
    if name != var {
        return Err(nom::Err::Failure(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("the loop variable"))],
        }));
    }
    Ok((rest, attr.to_string()))
}

fn join(
    first: Predicate,
    rest: Vec<Predicate>,
    combine: fn(Vec<Predicate>) -> Predicate,
) -> Predicate {
    if rest.is_empty() {
        return first;
    }
    let mut all = Vec::with_capacity(rest.len() + 1);
    all.push(first);
    all.extend(rest);
    combine(all)
}

// ---- tokens ---------------------------------------------------------------

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(terminated(tag(word), not(satisfy(is_ident_char))))
}

fn symbol<'a>(c: char) -> impl FnMut(&'a str) -> PResult<'a, char> {
    ws(char(c))
}

fn parenthesised<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(symbol('('), inner, cut(context("`)`", symbol(')'))))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn quoted(input: &str) -> PResult<'_, &str> {
    alt((
        map(delimited(char('"'), opt(is_not("\"")), char('"')), |text| {
            text.unwrap_or("")
        }),
        map(delimited(char('\''), opt(is_not("'")), char('\'')), |text| {
            text.unwrap_or("")
        }),
    ))(input)
}

fn param(input: &str) -> PResult<'_, usize> {
    preceded(char('$'), map_res(digit1, str::parse::<usize>))(input)
}

fn integer(input: &str) -> PResult<'_, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn number(input: &str) -> PResult<'_, Value> {
    alt((
        map_res(
            recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
            |text: &str| text.parse::<f64>().map(Value::Float),
        ),
        map(integer, Value::Integer),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::parse_query;
    use crate::model::value::Value;
    use crate::query::plan::{ItemRef, Query, QueryPlan, QuerySource};
    use crate::query::predicate::{CompareOp, Operand, Predicate};
    use crate::query::QueryError;

    fn single(text: &str) -> Query {
        match parse_query(text).unwrap() {
            QueryPlan::For(query) => query,
            other => panic!("expected a for clause, got {other:?}"),
        }
    }

    #[test]
    fn kind_sources_distinguish_in_and_inevery() {
        assert_eq!(
            single(r#"for i in "pim/Note""#),
            Query::new(QuerySource::exact("pim/Note"), Predicate::True)
        );
        assert_eq!(
            single(r#"for i inevery 'pim/ContentItem'"#).source,
            QuerySource::every("pim/ContentItem")
        );
    }

    #[test]
    fn predicates_follow_precedence() {
        let query = single(
            r#"for i in "pim/Note" where i.title == "a" or not i.title == "b" and has(i.body)"#,
        );
        assert_eq!(
            query.predicate,
            Predicate::Or(vec![
                Predicate::attr_eq("title", "a"),
                Predicate::And(vec![
                    Predicate::negate(Predicate::attr_eq("title", "b")),
                    Predicate::Has("body".to_string()),
                ]),
            ])
        );
    }

    #[test]
    fn operands_cover_literals_params_and_functions() {
        let query = single(
            r#"for e in $1 where len(e.attendees) >= 2 and e.start < @1000 and e.itsName != $2 and contains(e.location, "room") and matches(e.location, '^R[0-9]+$') and e.all_day == False and e.score > 1.5"#,
        );
        assert_eq!(
            query.source,
            QuerySource::Param {
                index: 1,
                recursive: false
            }
        );
        assert_eq!(
            query.predicate,
            Predicate::And(vec![
                Predicate::compare(
                    CompareOp::Ge,
                    Operand::len(Operand::attr("attendees")),
                    Operand::literal(2_i64)
                ),
                Predicate::compare(
                    CompareOp::Lt,
                    Operand::attr("start"),
                    Operand::Literal(Value::DateTime(1000))
                ),
                Predicate::compare(CompareOp::Ne, Operand::ItsName, Operand::Param(2)),
                Predicate::contains(Operand::attr("location"), Operand::literal("room")),
                Predicate::Matches(Operand::attr("location"), "^R[0-9]+$".to_string()),
                Predicate::compare(CompareOp::Eq, Operand::attr("all_day"), Operand::literal(false)),
                Predicate::compare(CompareOp::Gt, Operand::attr("score"), Operand::literal(1.5)),
            ])
        );
    }

    #[test]
    fn set_operations_nest() {
        let plan = parse_query(
            r#"difference(union(for i in index("events"), for i in $1.events), for i in "pim/Event" where i.all_day)"#,
        );
        assert!(plan.is_err(), "bare attribute is not a predicate");

        let plan = parse_query(
            r#"difference(union(for i in index("events"), for i in $1.events), for i in "pim/Event" where i.all_day == True)"#,
        )
        .unwrap();
        let QueryPlan::Difference(left, right) = plan else {
            panic!("expected difference");
        };
        assert_eq!(
            *left,
            QueryPlan::Union(vec![
                Query::new(QuerySource::Index("events".to_string()), Predicate::True).into(),
                Query::new(
                    QuerySource::Refs {
                        owner: ItemRef::Param(1),
                        attribute: "events".to_string()
                    },
                    Predicate::True
                )
                .into(),
            ])
        );
        assert!(matches!(*right, QueryPlan::For(_)));
    }

    #[test]
    fn foreign_variable_is_rejected() {
        let err = parse_query(r#"for i in "pim/Note" where j.title == "x""#).unwrap_err();
        let QueryError::Parse { message, .. } = err else {
            panic!("expected parse error");
        };
        assert!(message.contains("loop variable"), "{message}");
    }

    #[test]
    fn trailing_input_is_rejected() {
        assert!(matches!(
            parse_query(r#"for i in "pim/Note" extra"#),
            Err(QueryError::Parse { .. })
        ));
    }
}
