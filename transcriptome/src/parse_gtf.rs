use crate::Strand;
use anyhow::{bail, Result};
use nom::branch::alt;
use nom::bytes::complete::{is_not, take_until, take_while1};
use nom::character::complete::{char, space0, space1, u64 as decimal};
use nom::combinator::{all_consuming, eof, map, value};
use nom::multi::fold_many0;
use nom::number::complete::double;
use nom::sequence::{delimited, separated_pair, terminated, tuple};
use nom::IResult;
use smallvec::SmallVec;

/// Attribute `(key, value)` pairs in file order.
pub type AttrVec<'a> = SmallVec<[(&'a [u8], &'a [u8]); 16]>;

/// One feature line of a GTF or GFF3 file, borrowing from the line buffer.
/// Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    pub seqname: &'a [u8],
    pub source: &'a [u8],
    pub feature_type: &'a [u8],
    pub start: u64,
    pub end: u64,
    pub score: Option<f64>,
    pub strand: Option<Strand>,
    pub frame: &'a [u8],
    pub attributes: AttrVec<'a>,
}

impl<'a> Record<'a> {
    pub fn get_attr(&self, key: &str) -> Option<&'a [u8]> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key.as_bytes())
            .map(|&(_, v)| v)
    }
}

/// Parse a line without its terminator.
pub fn parse_gtf_line(line: &[u8]) -> IResult<&[u8], Record<'_>> {
    let columns = tuple((
        terminated(column, char('\t')),
        terminated(column, char('\t')),
        terminated(column, char('\t')),
        terminated(integer, char('\t')),
        terminated(integer, char('\t')),
        terminated(score, char('\t')),
        terminated(strand, char('\t')),
        terminated(column, char('\t')),
        attributes,
    ));
    all_consuming(map(
        columns,
        |(seqname, source, feature_type, start, end, score, strand, frame, attributes)| Record {
            seqname,
            source,
            feature_type,
            start,
            end,
            score,
            strand,
            frame,
            attributes,
        },
    ))(line)
}

fn column(input: &[u8]) -> IResult<&[u8], &[u8]> {
    is_not("\t\r\n ")(input)
}

fn integer(input: &[u8]) -> IResult<&[u8], u64> {
    decimal(input)
}

fn score(input: &[u8]) -> IResult<&[u8], Option<f64>> {
    alt((value(None, char('.')), map(double, Some)))(input)
}

/// `.` and `?` mark an unstranded feature.
fn strand(input: &[u8]) -> IResult<&[u8], Option<Strand>> {
    alt((
        value(Some(Strand::Forward), char('+')),
        value(Some(Strand::Reverse), char('-')),
        value(None, alt((char('.'), char('?')))),
    ))(input)
}

fn is_gtf_token(c: u8) -> bool {
    c.is_ascii_graphic() && !b"\"(),/:;<=>?@[\\]{}".contains(&c)
}

fn is_gff3_key(c: u8) -> bool {
    c > b' ' && !b"=;,".contains(&c)
}

/// Either `key "value"; key value;` (GTF) or `key=value;key=value` (GFF3). A lone `.` means none.
fn attributes(input: &[u8]) -> IResult<&[u8], AttrVec<'_>> {
    let gtf_pair = separated_pair(
        take_while1(is_gtf_token),
        space1,
        alt((
            delimited(char('"'), take_until("\""), char('"')),
            take_while1(is_gtf_token),
        )),
    );
    let gff3_pair = separated_pair(take_while1(is_gff3_key), char('='), is_not(";\t\r\n"));
    alt((
        value(AttrVec::new(), all_consuming(char('.'))),
        all_consuming(attribute_list(gtf_pair)),
        all_consuming(attribute_list(gff3_pair)),
    ))(input)
}

/// Pairs each followed by `;` and optional spaces, the last `;` being optional.
fn attribute_list<'a, P>(pair: P) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], AttrVec<'a>>
where
    P: FnMut(&'a [u8]) -> IResult<&'a [u8], (&'a [u8], &'a [u8])>,
{
    let end_of_pair = alt((value((), tuple((char(';'), space0))), value((), eof)));
    fold_many0(terminated(pair, end_of_pair), AttrVec::new, |mut attrs, kv| {
        attrs.push(kv);
        attrs
    })
}

/// Name the first column of a line that `parse_gtf_line` rejected, and what is wrong with it.
pub fn validate_gtf_line(line: &[u8]) -> Result<()> {
    let columns: Vec<&[u8]> = line.split(|&c| c == b'\t').collect();
    if columns.len() != 9 {
        bail!("expected 9 tab-separated columns but found {}", columns.len());
    }
    const NAMES: [&str; 9] = [
        "seqname",
        "source",
        "feature",
        "start",
        "end",
        "score",
        "strand",
        "frame",
        "attributes",
    ];
    for (i, (name, col)) in NAMES.iter().zip(columns).enumerate() {
        let problem = match i {
            3 | 4 => all_consuming(integer)(col)
                .err()
                .map(|_| format!("expected an integer, not \"{}\"", String::from_utf8_lossy(col))),
            5 => all_consuming(score)(col)
                .err()
                .map(|_| "expected \".\" or a number".to_string()),
            6 => all_consuming(strand)(col)
                .err()
                .map(|_| "expected one of \"+-.?\"".to_string()),
            8 => attributes(col)
                .err()
                .map(|_| "invalid attributes format".to_string()),
            _ if col.is_empty() => Some("cannot be empty".to_string()),
            _ if col.contains(&b' ') => Some("cannot contain spaces".to_string()),
            _ => None,
        };
        if let Some(problem) = problem {
            bail!("{name}: {problem}");
        }
    }
    Ok(())
}
