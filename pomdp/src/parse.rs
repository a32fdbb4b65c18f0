//! Reader for problems in Cassandra's `.POMDP` format.
//!
//! Headers (`discount`, `values`, `states`, `actions`, `observations`)
//! must come before `start` and the `T`, `O` and `R` tables. Table
//! statements may use names or indices, `*` for every element, and the
//! `uniform` and `identity` shorthands. Later statements overwrite earlier
//! ones.

use std::{fmt, fs, io, path::Path};

use thiserror::Error;

use crate::{
    array::Array,
    belief::Belief,
    model::{pomdp::Pomdp, Mdp, ModelError, Process, Rewards, Transitions},
};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unknown {kind} `{name}`")]
    UnknownName { kind: Kind, name: String },
    #[error("`{0}` is not a number")]
    Number(String),
    #[error("missing `{0}` declaration")]
    MissingHeader(&'static str),
    #[error("{0} declared after the tables")]
    LateHeader(Kind),
    #[error("{0}")]
    Model(#[from] ModelError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    State,
    Action,
    Observation,
}

impl Kind {
    const fn header(self) -> &'static str {
        match self {
            Self::State => "states",
            Self::Action => "actions",
            Self::Observation => "observations",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Action => write!(f, "action"),
            Self::Observation => write!(f, "observation"),
        }
    }
}

/// Read a problem file. The instance is named after the file stem.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is malformed, or
/// describes an invalid model.
pub fn load(path: impl AsRef<Path>) -> Result<Pomdp, ParseError> {
    let path = path.as_ref();
    let input = fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map_or_else(|| "pomdp".into(), |stem| stem.to_string_lossy());
    parse(&name, &input)
}

/// Parse a problem from text.
///
/// The reward of taking `a` in `s` is the expectation of the file's
/// `R(a, s, s', o)` over successor states and observations. Files with
/// `values: cost` have their rewards negated.
///
/// # Errors
///
/// Returns an error if the text is malformed or describes an invalid
/// model.
pub fn parse(name: &str, input: &str) -> Result<Pomdp, ParseError> {
    let mut parser = Parser::new(tokenize(input));
    while !parser.is_done() {
        parser.statement()?;
    }
    let pomdp = parser.finish(name)?;
    log::info!(
        "read {name}: {} states, {} actions, {} observations",
        pomdp.mdp().states(),
        pomdp.mdp().actions(),
        pomdp.observations()
    );
    Ok(pomdp)
}

/// Split into words with every `:` as a token of its own, dropping
/// comments.
fn tokenize(input: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    for line in input.lines() {
        let line = line.split_once('#').map_or(line, |(code, _)| code);
        for word in line.split_whitespace() {
            let mut rest = word;
            while let Some(i) = rest.find(':') {
                if i > 0 {
                    tokens.push(&rest[..i]);
                }
                tokens.push(":");
                rest = &rest[i + 1..];
            }
            if !rest.is_empty() {
                tokens.push(rest);
            }
        }
    }
    tokens
}

fn number(token: &str) -> Result<f64, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::Number(token.to_owned()))
}

struct Names<'a> {
    count: usize,
    /// Empty when only a count was declared.
    names: Vec<&'a str>,
}

impl Names<'_> {
    fn position(&self, token: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|name| *name == token)
            .or_else(|| token.parse().ok().filter(|&i| i < self.count))
    }
}

enum Values {
    Entry(f64),
    Row(Vec<f64>),
    Matrix { values: Vec<f64>, columns: usize },
}

/// The right-hand side of a table statement: a value for every
/// `(row, column)` pair it covers.
struct Block {
    rows: Vec<usize>,
    columns: Vec<usize>,
    values: Values,
}

impl Block {
    fn cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows.iter().flat_map(move |&row| {
            self.columns.iter().map(move |&column| {
                let value = match &self.values {
                    Values::Entry(value) => *value,
                    Values::Row(values) => values[column],
                    Values::Matrix { values, columns } => values[row * columns + column],
                };
                (row, column, value)
            })
        })
    }
}

/// An `R` statement, kept until every statement has been read.
struct RewardStatement {
    actions: Vec<usize>,
    states: Vec<usize>,
    /// Over successor states and observations.
    block: Block,
}

struct Tables {
    /// `[s, a, s']`
    transitions: Array<3>,
    /// `[a, s', o]`
    observations: Array<3>,
}

impl Tables {
    fn new(states: usize, actions: usize, observations: usize) -> Self {
        Self {
            transitions: Array::zeros([states, actions, states]),
            observations: Array::zeros([actions, states, observations]),
        }
    }
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    position: usize,
    discount: Option<f64>,
    cost: bool,
    states: Option<Names<'a>>,
    actions: Option<Names<'a>>,
    observations: Option<Names<'a>>,
    start: Option<Vec<f64>>,
    tables: Option<Tables>,
    rewards: Vec<RewardStatement>,
}

impl<'a> Parser<'a> {
    const fn new(tokens: Vec<&'a str>) -> Self {
        Self {
            tokens,
            position: 0,
            discount: None,
            cost: false,
            states: None,
            actions: None,
            observations: None,
            start: None,
            tables: None,
            rewards: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn advance(&mut self) -> Result<&'a str, ParseError> {
        let token = self
            .tokens
            .get(self.position)
            .copied()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.position += 1;
        Ok(token)
    }

    fn eat(&mut self, expected: &str) -> bool {
        let found = self.tokens.get(self.position) == Some(&expected);
        if found {
            self.position += 1;
        }
        found
    }

    fn expect(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.advance()? {
            token if token == expected => Ok(()),
            token => Err(ParseError::UnexpectedToken(token.to_owned())),
        }
    }

    fn number(&mut self) -> Result<f64, ParseError> {
        number(self.advance()?)
    }

    /// Does a new statement begin at the current token?
    fn at_statement(&self) -> bool {
        matches!(
            &self.tokens[self.position..],
            [_, ":", ..] | ["start", "include" | "exclude", ..]
        )
    }

    /// Tokens up to the next statement.
    fn list(&mut self) -> Vec<&'a str> {
        let begin = self.position;
        while !self.is_done() && !self.at_statement() {
            self.position += 1;
        }
        self.tokens[begin..self.position].to_vec()
    }

    fn names(&self, kind: Kind) -> Result<&Names<'a>, ParseError> {
        match kind {
            Kind::State => self.states.as_ref(),
            Kind::Action => self.actions.as_ref(),
            Kind::Observation => self.observations.as_ref(),
        }
        .ok_or(ParseError::MissingHeader(kind.header()))
    }

    fn count(&self, kind: Kind) -> Result<usize, ParseError> {
        self.names(kind).map(|names| names.count)
    }

    fn resolve(&self, kind: Kind, token: &str) -> Result<Vec<usize>, ParseError> {
        let names = self.names(kind)?;
        if token == "*" {
            return Ok((0..names.count).collect());
        }
        names
            .position(token)
            .map(|i| vec![i])
            .ok_or_else(|| ParseError::UnknownName {
                kind,
                name: token.to_owned(),
            })
    }

    fn indices(&mut self, kind: Kind) -> Result<Vec<usize>, ParseError> {
        let token = self.advance()?;
        self.resolve(kind, token)
    }

    fn tables(&mut self) -> Result<&mut Tables, ParseError> {
        let states = self.count(Kind::State)?;
        let actions = self.count(Kind::Action)?;
        let observations = self.count(Kind::Observation)?;
        Ok(self
            .tables
            .get_or_insert_with(|| Tables::new(states, actions, observations)))
    }

    fn statement(&mut self) -> Result<(), ParseError> {
        match self.advance()? {
            "discount" => {
                self.expect(":")?;
                self.discount = Some(self.number()?);
            }
            "values" => {
                self.expect(":")?;
                self.cost = match self.advance()? {
                    "reward" => false,
                    "cost" => true,
                    token => return Err(ParseError::UnexpectedToken(token.to_owned())),
                };
            }
            "states" => self.declare(Kind::State)?,
            "actions" => self.declare(Kind::Action)?,
            "observations" => self.declare(Kind::Observation)?,
            "start" => self.start()?,
            "T" => {
                self.expect(":")?;
                let actions = self.indices(Kind::Action)?;
                let block = self.block(Kind::State, Kind::State, true)?;
                let transitions = &mut self.tables()?.transitions;
                for &a in &actions {
                    for (s, next, p) in block.cells() {
                        transitions[[s, a, next]] = p;
                    }
                }
            }
            "O" => {
                self.expect(":")?;
                let actions = self.indices(Kind::Action)?;
                let block = self.block(Kind::State, Kind::Observation, true)?;
                let observations = &mut self.tables()?.observations;
                for &a in &actions {
                    for (next, o, p) in block.cells() {
                        observations[[a, next, o]] = p;
                    }
                }
            }
            "R" => {
                self.expect(":")?;
                let actions = self.indices(Kind::Action)?;
                self.expect(":")?;
                let states = self.indices(Kind::State)?;
                let block = self.block(Kind::State, Kind::Observation, false)?;
                self.rewards.push(RewardStatement {
                    actions,
                    states,
                    block,
                });
            }
            token => return Err(ParseError::UnexpectedToken(token.to_owned())),
        }
        Ok(())
    }

    fn declare(&mut self, kind: Kind) -> Result<(), ParseError> {
        self.expect(":")?;
        if self.tables.is_some() || self.start.is_some() || !self.rewards.is_empty() {
            return Err(ParseError::LateHeader(kind));
        }
        let list = self.list();
        let count = match list.as_slice() {
            [] => return Err(ModelError::Empty.into()),
            [token] => token.parse().ok(),
            _ => None,
        };
        let names = match count {
            Some(count) => Names {
                count,
                names: Vec::new(),
            },
            None => Names {
                count: list.len(),
                names: list,
            },
        };
        match kind {
            Kind::State => self.states = Some(names),
            Kind::Action => self.actions = Some(names),
            Kind::Observation => self.observations = Some(names),
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), ParseError> {
        let mode = self.advance()?;
        if mode != ":" {
            self.expect(":")?;
        }
        let list = self.list();
        let names = self.names(Kind::State)?;
        let states = names.count;
        let single = match list.as_slice() {
            [token] => names.position(token),
            _ => None,
        };

        let entries: Vec<f64> = match (mode, list.as_slice(), single) {
            ("include" | "exclude", _, _) => {
                let mut listed = vec![false; states];
                for token in &list {
                    for s in self.resolve(Kind::State, token)? {
                        listed[s] = true;
                    }
                }
                let keep = mode == "include";
                let support = listed.iter().filter(|&&l| l == keep).count();
                listed
                    .iter()
                    .map(|&l| if l == keep { 1.0 / support as f64 } else { 0.0 })
                    .collect()
            }
            (":", ["uniform"], _) => vec![1.0 / states as f64; states],
            (":", _, Some(state)) => {
                let mut entries = vec![0.0; states];
                entries[state] = 1.0;
                entries
            }
            (":", tokens, None) if tokens.len() == states => tokens
                .iter()
                .map(|token| number(token))
                .collect::<Result<_, _>>()?,
            (":", [], _) => return Err(ParseError::UnexpectedEnd),
            (_, [token, ..], _) => return Err(ParseError::UnexpectedToken((*token).to_owned())),
            (token, [], _) => return Err(ParseError::UnexpectedToken(token.to_owned())),
        };
        self.start = Some(entries);
        Ok(())
    }

    /// Parse the rest of a table statement over `rows × columns`: either
    /// `: row : column value`, `: row` followed by a row of values, or a
    /// whole matrix.
    fn block(&mut self, rows: Kind, columns: Kind, probabilities: bool) -> Result<Block, ParseError> {
        let row_count = self.count(rows)?;
        let column_count = self.count(columns)?;
        if !self.eat(":") {
            let values = if probabilities && self.eat("uniform") {
                vec![1.0 / column_count as f64; row_count * column_count]
            } else if probabilities && row_count == column_count && self.eat("identity") {
                (0..row_count * column_count)
                    .map(|i| f64::from(u8::from(i / column_count == i % column_count)))
                    .collect()
            } else {
                (0..row_count * column_count)
                    .map(|_| self.number())
                    .collect::<Result<_, _>>()?
            };
            return Ok(Block {
                rows: (0..row_count).collect(),
                columns: (0..column_count).collect(),
                values: Values::Matrix {
                    values,
                    columns: column_count,
                },
            });
        }

        let row_indices = self.indices(rows)?;
        if !self.eat(":") {
            let values = if probabilities && self.eat("uniform") {
                vec![1.0 / column_count as f64; column_count]
            } else {
                (0..column_count)
                    .map(|_| self.number())
                    .collect::<Result<_, _>>()?
            };
            return Ok(Block {
                rows: row_indices,
                columns: (0..column_count).collect(),
                values: Values::Row(values),
            });
        }

        let column_indices = self.indices(columns)?;
        Ok(Block {
            rows: row_indices,
            columns: column_indices,
            values: Values::Entry(self.number()?),
        })
    }

    fn finish(mut self, name: &str) -> Result<Pomdp, ParseError> {
        let discount = self.discount.ok_or(ParseError::MissingHeader("discount"))?;
        let states = self.count(Kind::State)?;
        let actions = self.count(Kind::Action)?;
        let observations = self.count(Kind::Observation)?;
        if states == 0 || actions == 0 || observations == 0 {
            return Err(ModelError::Empty.into());
        }
        let labels: Vec<String> = self
            .names(Kind::Action)?
            .names
            .iter()
            .map(ToString::to_string)
            .collect();
        let tables = self
            .tables
            .take()
            .unwrap_or_else(|| Tables::new(states, actions, observations));

        let rewards = expected_rewards(&tables, &self.rewards, self.cost);

        let entries = self
            .start
            .unwrap_or_else(|| vec![1.0 / states as f64; states]);
        let initial_state = entries
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (s, &p)| {
                if p > best.1 {
                    (s, p)
                } else {
                    best
                }
            })
            .0;
        let initial_belief = Belief::new(entries).map_err(ModelError::from)?;

        let mut mdp = Mdp::new(
            name,
            discount,
            Rewards::Stationary(rewards),
            Transitions::Stationary(tables.transitions),
            initial_state,
        )?;
        if !labels.is_empty() {
            mdp = mdp.with_action_labels(labels)?;
        }
        Ok(Pomdp::new(mdp, tables.observations, initial_belief)?)
    }
}

/// Reduce the `R` statements to `R(s, a)`, the expectation over successor
/// states and observations. Each `(a, s)` pair is rebuilt in a scratch
/// `[s', o]` table so that later statements overwrite earlier ones.
fn expected_rewards(tables: &Tables, statements: &[RewardStatement], cost: bool) -> Array<2> {
    let [states, actions, _] = tables.transitions.shape();
    let observations = tables.observations.shape()[2];

    let mut covering = vec![Vec::new(); actions * states];
    for (n, statement) in statements.iter().enumerate() {
        for &a in &statement.actions {
            for &s in &statement.states {
                covering[a * states + s].push(n);
            }
        }
    }

    let sign = if cost { -1.0 } else { 1.0 };
    let mut scratch = Array::zeros([states, observations]);
    let mut rewards = Array::zeros([states, actions]);
    for (pair, covered_by) in covering.iter().enumerate() {
        if covered_by.is_empty() {
            continue;
        }
        let (a, s) = (pair / states, pair % states);
        for row in scratch.rows_mut() {
            row.fill(0.0);
        }
        for &n in covered_by {
            for (next, o, r) in statements[n].block.cells() {
                scratch[[next, o]] = r;
            }
        }
        let expected: f64 = (0..states)
            .map(|next| {
                let immediate: f64 = (0..observations)
                    .map(|o| tables.observations[[a, next, o]] * scratch[[next, o]])
                    .sum();
                tables.transitions[[s, a, next]] * immediate
            })
            .sum();
        rewards[[s, a]] = sign * expected;
    }
    rewards
}

#[cfg(test)]
mod tests {
    use super::{load, parse, tokenize, Kind, ParseError};
    use crate::model::{fixtures::tiger, ModelError, Process};

    const TIGER: &str = "\
# The tiger problem
discount: 0.95
values: reward
states: tiger-left tiger-right
actions: listen open-left open-right
observations: tiger-left tiger-right
start: uniform

T: listen
identity

T: open-left
uniform

T: open-right
uniform

O: listen
0.85 0.15
0.15 0.85

O: open-left
uniform

O: open-right
uniform

R: listen : * : * : * -1
R: open-left : tiger-left : * : * -100
R: open-left : tiger-right : * : * 10
R: open-right : tiger-left : * : * 10
R: open-right : tiger-right : * : * -100
";

    #[test]
    fn tokens() {
        assert_eq!(
            tokenize("T:listen : 0:1 0.5 # trailing\n# whole line\nR: *"),
            vec!["T", ":", "listen", ":", "0", ":", "1", "0.5", "R", ":", "*"]
        );
    }

    #[test]
    fn tiger_matches_fixture() {
        let parsed = parse("tiger", TIGER).unwrap();
        let expected = tiger();
        assert_eq!(parsed.mdp().name(), "tiger");
        assert_eq!(parsed.mdp().discount(), 0.95);
        assert_eq!(parsed.observations(), 2);
        for s in 0..2 {
            for a in 0..3 {
                assert!((parsed.reward(s, a) - expected.reward(s, a)).abs() < 1e-12);
                for next in 0..2 {
                    assert_eq!(parsed.transition(s, a, next), expected.transition(s, a, next));
                    assert_eq!(
                        parsed.observation(a, next, s),
                        expected.observation(a, next, s)
                    );
                }
            }
        }
        assert_eq!(parsed.initial_belief().entries(), &[0.5, 0.5]);
        assert_eq!(parsed.mdp().action_label(1), "open-left");
    }

    #[test]
    fn rewards_are_expected_over_successors() {
        let input = "\
discount: 0.5
states: 2
actions: 1
observations: 2
T: 0 : 0
0.25 0.75
T: 0 : 1 : 1 1.0
O: 0
1.0 0.0
0.5 0.5
R: 0 : 0 : 0 : * 4
R: 0 : 0 : 1
2 10
";
        let pomdp = parse("expectation", input).unwrap();
        // 0.25 * 4 + 0.75 * (0.5 * 2 + 0.5 * 10)
        assert!((pomdp.reward(0, 0) - 5.5).abs() < 1e-12);
        assert_eq!(pomdp.reward(1, 0), 0.0);
        assert_eq!(pomdp.mdp().action_label(0), "0");
    }

    #[test]
    fn wildcard_reward_over_many_states() {
        let input = "\
discount: 0.9
states: 200
actions: 10
observations: 10
T: *
identity
O: *
uniform
R: * : * : * : * 1
R: 3 : 7 : * : * -2
";
        let pomdp = parse("big", input).unwrap();
        assert_eq!(pomdp.states(), 200);
        for s in [0, 7, 199] {
            for a in [0, 3, 9] {
                let expected = if (a, s) == (3, 7) { -2.0 } else { 1.0 };
                assert!((pomdp.reward(s, a) - expected).abs() < 1e-9, "({s}, {a})");
            }
        }
        assert!(matches!(
            parse("big", &input.replace("-2", "inf")),
            Err(ParseError::Model(ModelError::NonFiniteReward { index, .. })) if index == vec![7, 3]
        ));
    }

    #[test]
    fn costs_are_negated() {
        let input = TIGER.replace("values: reward", "values: cost");
        let pomdp = parse("tiger", &input).unwrap();
        assert!((pomdp.reward(0, 0) - 1.0).abs() < 1e-12);
        assert!((pomdp.reward(0, 1) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn later_statements_win() {
        let input = format!("{TIGER}\nT: listen : tiger-left\n0.9 0.1\n");
        let pomdp = parse("tiger", &input).unwrap();
        assert_eq!(pomdp.transition(0, 0, 0), 0.9);
        assert_eq!(pomdp.transition(1, 0, 1), 1.0);
    }

    #[test]
    fn start_forms() {
        let header = "discount: 0.9\nstates: a b c\nactions: 1\nobservations: 1\n";
        let tables = "T: 0\nidentity\nO: 0\nuniform\n";
        for (start, expected) in [
            ("start: 0.2 0.3 0.5", [0.2, 0.3, 0.5]),
            ("start: b", [0.0, 1.0, 0.0]),
            ("start: 2", [0.0, 0.0, 1.0]),
            ("start include: a c", [0.5, 0.0, 0.5]),
            ("start exclude: a", [0.0, 0.5, 0.5]),
        ] {
            let pomdp = parse("start", &format!("{header}{start}\n{tables}")).unwrap();
            assert_eq!(pomdp.initial_belief().entries(), &expected, "{start}");
        }
        let pomdp = parse("start", &format!("{header}start: b\n{tables}")).unwrap();
        assert_eq!(pomdp.mdp().initial_state(), 1);
        let pomdp = parse("start", &format!("{header}{tables}")).unwrap();
        assert_eq!(pomdp.initial_belief().states(), 3);
        assert!((pomdp.initial_belief().get(0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            parse("x", "discount: 0.9\nstates: 2\nT: 0 : 0 : 0 1.0"),
            Err(ParseError::MissingHeader("actions"))
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("T: listen", "T: shout")),
            Err(ParseError::UnknownName { kind: Kind::Action, name }) if name == "shout"
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("0.85 0.15", "0.85 oops")),
            Err(ParseError::Number(token)) if token == "oops"
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("values", "worth")),
            Err(ParseError::UnexpectedToken(token)) if token == "worth"
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("0.85 0.15", "0.85 0.25")),
            Err(ParseError::Model(ModelError::NotADistribution { .. }))
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("discount: 0.95", "discount: 1")),
            Err(ParseError::Model(ModelError::InvalidDiscount(_)))
        ));
        assert!(matches!(
            parse("x", &TIGER.replace("discount: 0.95", "")),
            Err(ParseError::MissingHeader("discount"))
        ));
        assert!(matches!(
            parse("x", &format!("{TIGER}states: 3\n")),
            Err(ParseError::LateHeader(Kind::State))
        ));
        assert!(matches!(
            parse("x", "discount:"),
            Err(ParseError::UnexpectedEnd)
        ));
    }

    #[test]
    fn load_names_instance_after_file() {
        let path = std::env::temp_dir().join(format!("tiger-{}.POMDP", std::process::id()));
        std::fs::write(&path, TIGER).unwrap();
        let pomdp = load(&path);
        std::fs::remove_file(&path).unwrap();
        let pomdp = pomdp.unwrap();
        assert_eq!(
            pomdp.mdp().name(),
            format!("tiger-{}", std::process::id())
        );
        assert!(matches!(
            load("/nonexistent/problem.POMDP"),
            Err(ParseError::Io(_))
        ));
    }
}
