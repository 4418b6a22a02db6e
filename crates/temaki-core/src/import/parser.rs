//! Line-oriented FSH parser: tokens -> [`Document`]
//!
//! Entities are introduced by a keyword header (`Profile:`, `Instance:`,
//! ...); metadata lines bind to the most recent header and `*` lines are
//! rules. An unparseable rule line is reported as `Unsupported rule` and
//! dropped; entity parsing continues, so one bad rule never takes down its
//! siblings.

use super::lexer::{self, Token, TokenKind};
use crate::ast::*;
use crate::diagnostics::{DiagnosticCollector, Location};
use std::path::Path;

const ENTITY_KEYWORDS: &[&str] = &[
    "Profile",
    "Extension",
    "Instance",
    "RuleSet",
    "ValueSet",
    "CodeSystem",
    "Alias",
];

const METADATA_KEYWORDS: &[&str] = &[
    "Id",
    "Parent",
    "Title",
    "Description",
    "InstanceOf",
    "Usage",
    "Mixins",
];

/// Parse one source file into a [`Document`]
pub fn parse_document(file: &Path, source: &str, collector: &DiagnosticCollector) -> Document {
    let (tokens, lex_errors) = lexer::lex(source);
    for err in lex_errors {
        collector.warn_at(
            err.message,
            Location::with_span(file, err.line, err.col, err.line, err.col),
        );
    }

    let mut parser = DocumentParser {
        file,
        collector,
        document: Document::new(file),
        current: None,
    };
    for line in split_lines(tokens) {
        parser.handle_line(&line);
    }
    parser.finish()
}

fn split_lines(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token.kind == TokenKind::Newline {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn line_location(file: &Path, line: &[Token]) -> Location {
    let first = &line[0];
    let last = &line[line.len() - 1];
    Location::with_span(file, first.line, first.col, last.end_line, last.end_col)
}

fn line_text(line: &[Token]) -> String {
    line.iter()
        .map(|t| match t.kind {
            TokenKind::Str => format!("\"{}\"", t.text),
            _ => t.text.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entity under construction
enum Builder {
    Profile(Profile),
    Extension(Extension),
    Instance(Instance),
    RuleSet(RuleSet),
    ValueSet(FshValueSet),
    CodeSystem(FshCodeSystem),
}

struct DocumentParser<'a> {
    file: &'a Path,
    collector: &'a DiagnosticCollector,
    document: Document,
    current: Option<Builder>,
}

impl<'a> DocumentParser<'a> {
    fn finish(mut self) -> Document {
        self.close_current();
        self.document
    }

    fn close_current(&mut self) {
        if let Some(builder) = self.current.take() {
            self.document.entities.push(match builder {
                Builder::Profile(p) => Entity::Profile(p),
                Builder::Extension(x) => Entity::Extension(x),
                Builder::Instance(i) => Entity::Instance(i),
                Builder::RuleSet(r) => Entity::RuleSet(r),
                Builder::ValueSet(v) => Entity::ValueSet(v),
                Builder::CodeSystem(c) => Entity::CodeSystem(c),
            });
        }
    }

    fn handle_line(&mut self, line: &[Token]) {
        let first = &line[0];
        match first.kind {
            TokenKind::Star => self.handle_rule_line(line),
            TokenKind::Word if first.text.ends_with(':') && first.text.len() > 1 => {
                let keyword = &first.text[..first.text.len() - 1];
                if ENTITY_KEYWORDS.contains(&keyword) {
                    self.handle_header(keyword, line);
                } else if METADATA_KEYWORDS.contains(&keyword) {
                    self.handle_metadata(keyword, line);
                } else {
                    self.collector.warn_at(
                        format!("Unknown metadata: {keyword}"),
                        line_location(self.file, line),
                    );
                }
            }
            _ => {
                self.collector.warn_at(
                    format!("Unsupported rule: {}", line_text(line)),
                    line_location(self.file, line),
                );
            }
        }
    }

    fn handle_header(&mut self, keyword: &str, line: &[Token]) {
        let location = line_location(self.file, line);

        if keyword == "Alias" {
            // Alias: NAME = url — complete on one line, no body
            let name = line.get(1).filter(|t| t.kind == TokenKind::Word);
            let eq = line.get(2).filter(|t| t.kind == TokenKind::Equals);
            let url = line.get(3).filter(|t| t.kind == TokenKind::Word);
            match (name, eq, url) {
                (Some(name), Some(_), Some(url)) => {
                    self.close_current();
                    self.document.entities.push(Entity::Alias(Alias {
                        name: name.text.clone(),
                        url: url.text.clone(),
                        location,
                    }));
                }
                _ => self.collector.warn_at(
                    format!("Unsupported rule: {}", line_text(line)),
                    location,
                ),
            }
            return;
        }

        let Some(name) = line.get(1).filter(|t| t.kind == TokenKind::Word) else {
            self.collector
                .warn_at(format!("Missing name after {keyword}:"), location);
            return;
        };
        let name = name.text.clone();

        self.close_current();
        self.current = Some(match keyword {
            "Profile" => Builder::Profile(Profile {
                name,
                id: None,
                parent: None,
                title: None,
                description: None,
                rules: Vec::new(),
                location,
            }),
            "Extension" => Builder::Extension(Extension {
                name,
                id: None,
                parent: None,
                title: None,
                description: None,
                rules: Vec::new(),
                location,
            }),
            "Instance" => Builder::Instance(Instance {
                name,
                id: None,
                instance_of: String::new(),
                title: None,
                description: None,
                usage: InstanceUsage::default(),
                usage_explicit: false,
                rules: Vec::new(),
                mixins: Vec::new(),
                location,
            }),
            "RuleSet" => Builder::RuleSet(RuleSet {
                name,
                rules: Vec::new(),
                location,
            }),
            "ValueSet" => Builder::ValueSet(FshValueSet {
                name,
                id: None,
                title: None,
                description: None,
                components: Vec::new(),
                caret_rules: Vec::new(),
                location,
            }),
            "CodeSystem" => Builder::CodeSystem(FshCodeSystem {
                name,
                id: None,
                title: None,
                description: None,
                concepts: Vec::new(),
                caret_rules: Vec::new(),
                location,
            }),
            _ => unreachable!("keyword list is closed"),
        });
    }

    fn handle_metadata(&mut self, keyword: &str, line: &[Token]) {
        let location = line_location(self.file, line);
        let word_value = || line.get(1).map(|t| t.text.clone()).unwrap_or_default();
        let string_value = || {
            line.get(1)
                .filter(|t| matches!(t.kind, TokenKind::Str | TokenKind::MultilineStr))
                .map(|t| t.text.clone())
        };

        let Some(builder) = self.current.as_mut() else {
            self.collector
                .warn_at(format!("Metadata outside an entity: {keyword}"), location);
            return;
        };

        let unknown = |collector: &DiagnosticCollector| {
            collector.warn_at(
                format!("Unknown metadata: {keyword} is not supported here"),
                location.clone(),
            );
        };

        match builder {
            Builder::Profile(p) => match keyword {
                "Id" => p.id = Some(word_value()),
                "Parent" => p.parent = Some(word_value()),
                "Title" => p.title = string_value(),
                "Description" => p.description = string_value(),
                _ => unknown(self.collector),
            },
            Builder::Extension(x) => match keyword {
                "Id" => x.id = Some(word_value()),
                "Parent" => x.parent = Some(word_value()),
                "Title" => x.title = string_value(),
                "Description" => x.description = string_value(),
                _ => unknown(self.collector),
            },
            Builder::Instance(i) => match keyword {
                "Id" => i.id = Some(word_value()),
                "InstanceOf" => i.instance_of = word_value(),
                "Title" => i.title = string_value(),
                "Description" => i.description = string_value(),
                "Usage" => {
                    let value = word_value();
                    match InstanceUsage::parse(&value) {
                        Some(usage) => {
                            i.usage = usage;
                            i.usage_explicit = true;
                        }
                        None => self.collector.warn_at(
                            format!("Unknown instance usage: {value}"),
                            location.clone(),
                        ),
                    }
                }
                "Mixins" => {
                    i.mixins = line[1..]
                        .iter()
                        .filter(|t| t.kind == TokenKind::Word && t.text != "and")
                        .map(|t| t.text.clone())
                        .collect();
                }
                _ => unknown(self.collector),
            },
            Builder::RuleSet(_) => unknown(self.collector),
            Builder::ValueSet(v) => match keyword {
                "Id" => v.id = Some(word_value()),
                "Title" => v.title = string_value(),
                "Description" => v.description = string_value(),
                _ => unknown(self.collector),
            },
            Builder::CodeSystem(c) => match keyword {
                "Id" => c.id = Some(word_value()),
                "Title" => c.title = string_value(),
                "Description" => c.description = string_value(),
                _ => unknown(self.collector),
            },
        }
    }

    fn handle_rule_line(&mut self, line: &[Token]) {
        let location = line_location(self.file, line);
        let body = &line[1..];
        if body.is_empty() {
            self.collector
                .warn_at("Unsupported rule: *".to_string(), location);
            return;
        }

        let unsupported = |collector: &DiagnosticCollector| {
            collector.warn_at(
                format!("Unsupported rule: {}", line_text(line)),
                location.clone(),
            );
        };

        let Some(builder) = self.current.as_mut() else {
            unsupported(self.collector);
            return;
        };

        match builder {
            Builder::Profile(_) | Builder::Extension(_) | Builder::RuleSet(_) => {
                match parse_sd_rules(body, &location) {
                    Some(rules) => match builder {
                        Builder::Profile(p) => p.rules.extend(rules),
                        Builder::Extension(x) => x.rules.extend(rules),
                        Builder::RuleSet(r) => r.rules.extend(rules),
                        _ => unreachable!(),
                    },
                    None => unsupported(self.collector),
                }
            }
            Builder::Instance(i) => match parse_instance_rule(body, &location) {
                Some(rule) => i.rules.push(rule),
                None => unsupported(self.collector),
            },
            Builder::ValueSet(v) => match parse_valueset_line(body, &location) {
                Some(VsLine::Component(c)) => v.components.push(c),
                Some(VsLine::Caret(c)) => v.caret_rules.push(c),
                None => unsupported(self.collector),
            },
            Builder::CodeSystem(c) => match parse_codesystem_line(body, &location) {
                Some(CsLine::Concept(concept)) => c.concepts.push(concept),
                Some(CsLine::Caret(caret)) => c.caret_rules.push(caret),
                None => unsupported(self.collector),
            },
        }
    }
}

// ============================================================================
// Rule parsing
// ============================================================================

fn is_flag_word(word: &str) -> bool {
    matches!(word, "MS" | "SU" | "?!")
}

fn apply_flag(set: &mut FlagSet, word: &str) {
    match word {
        "MS" => set.must_support = true,
        "SU" => set.summary = true,
        "?!" => set.modifier = true,
        _ => {}
    }
}

/// `min..max` with either side optional
fn parse_card(word: &str) -> Option<(Option<u32>, Option<String>)> {
    let (min_s, max_s) = word.split_once("..")?;
    let min = if min_s.is_empty() {
        None
    } else {
        Some(min_s.parse::<u32>().ok()?)
    };
    let max = if max_s.is_empty() {
        None
    } else if max_s == "*" {
        Some("*".to_string())
    } else {
        max_s.parse::<u32>().ok()?;
        Some(max_s.to_string())
    };
    Some((min, max))
}

/// Rules legal on a Profile, Extension, or RuleSet body. One line may carry a
/// card rule plus trailing flags; those surface as two rules.
fn parse_sd_rules(body: &[Token], location: &Location) -> Option<Vec<Rule>> {
    let first = body.first()?;

    // * insert RuleSetName
    if first.kind == TokenKind::Word && first.text == "insert" {
        let name = body.get(1).filter(|t| t.kind == TokenKind::Word)?;
        return Some(vec![Rule::Insert(InsertRule {
            rule_set: name.text.clone(),
            location: location.clone(),
        })]);
    }

    // * ^caretPath = value  (rule on the definition itself)
    if first.kind == TokenKind::Word && first.text.starts_with('^') {
        let rule = parse_caret_rule(String::new(), &first.text[1..], &body[1..], location)?;
        return Some(vec![Rule::CaretValue(rule)]);
    }

    // Multi-path flag rule: * path1, path2 MS
    if body.iter().any(|t| t.kind == TokenKind::Comma) {
        return parse_multi_path_flags(body, location).map(|r| vec![Rule::Flag(r)]);
    }

    if first.kind != TokenKind::Word {
        return None;
    }
    let path = first.text.clone();
    let rest = &body[1..];
    let second = rest.first();

    match second {
        // * path  (bare path is meaningless)
        None => None,
        Some(tok) if tok.kind == TokenKind::Equals => {
            let (value, exactly) = parse_value_with_exactly(&rest[1..])?;
            Some(vec![Rule::FixedValue(FixedValueRule {
                path,
                value,
                exactly,
                location: location.clone(),
            })])
        }
        Some(tok) if tok.kind == TokenKind::Word => {
            let word = tok.text.as_str();
            if let Some((min, max)) = parse_card(word) {
                let mut rules = vec![Rule::Card(CardRule {
                    path: path.clone(),
                    min,
                    max,
                    location: location.clone(),
                })];
                let mut flags = FlagSet::default();
                for t in &rest[1..] {
                    if t.kind == TokenKind::Word && is_flag_word(&t.text) {
                        apply_flag(&mut flags, &t.text);
                    } else {
                        return None;
                    }
                }
                if flags != FlagSet::default() {
                    rules.push(Rule::Flag(FlagRule {
                        paths: vec![path],
                        must_support: flags.must_support,
                        summary: flags.summary,
                        modifier: flags.modifier,
                        location: location.clone(),
                    }));
                }
                Some(rules)
            } else if word == "from" {
                parse_binding_rule(path, &rest[1..], location).map(|r| vec![Rule::Binding(r)])
            } else if word == "only" {
                parse_only_rule(path, &rest[1..], location).map(|r| vec![Rule::Only(r)])
            } else if word == "contains" {
                parse_contains_rule(path, &rest[1..], location).map(|r| vec![Rule::Contains(r)])
            } else if word.starts_with('^') {
                parse_caret_rule(path, &word[1..], &rest[1..], location)
                    .map(|r| vec![Rule::CaretValue(r)])
            } else if is_flag_word(word) {
                let mut flags = FlagSet::default();
                for t in rest {
                    if t.kind == TokenKind::Word && is_flag_word(&t.text) {
                        apply_flag(&mut flags, &t.text);
                    } else {
                        return None;
                    }
                }
                Some(vec![Rule::Flag(FlagRule {
                    paths: vec![path],
                    must_support: flags.must_support,
                    summary: flags.summary,
                    modifier: flags.modifier,
                    location: location.clone(),
                })])
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_multi_path_flags(body: &[Token], location: &Location) -> Option<FlagRule> {
    let mut paths = Vec::new();
    let mut flags = FlagSet::default();
    let mut seen_flag = false;
    for token in body {
        match token.kind {
            TokenKind::Comma => {}
            TokenKind::Word if is_flag_word(&token.text) => {
                seen_flag = true;
                apply_flag(&mut flags, &token.text);
            }
            TokenKind::Word if !seen_flag => paths.push(token.text.clone()),
            _ => return None,
        }
    }
    if paths.is_empty() || !seen_flag {
        return None;
    }
    Some(FlagRule {
        paths,
        must_support: flags.must_support,
        summary: flags.summary,
        modifier: flags.modifier,
        location: location.clone(),
    })
}

fn parse_binding_rule(path: String, rest: &[Token], location: &Location) -> Option<BindingRule> {
    let value_set = rest.first().filter(|t| t.kind == TokenKind::Word)?;
    let mut strength = BindingStrength::Required;
    match &rest[1..] {
        [] => {}
        [lp, word, rp]
            if lp.kind == TokenKind::LParen
                && word.kind == TokenKind::Word
                && rp.kind == TokenKind::RParen =>
        {
            strength = BindingStrength::parse(&word.text)?;
        }
        _ => return None,
    }
    Some(BindingRule {
        path,
        value_set: value_set.text.clone(),
        strength,
        location: location.clone(),
    })
}

fn parse_only_rule(path: String, rest: &[Token], location: &Location) -> Option<OnlyRule> {
    let mut types = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let token = &rest[i];
        match token.kind {
            TokenKind::Word if token.text == "or" || token.text == "|" => i += 1,
            TokenKind::Word if token.text == "Reference" || token.text == "Canonical" => {
                // Reference(A or B) / Reference(A | B)
                if rest.get(i + 1).map(|t| t.kind) != Some(TokenKind::LParen) {
                    return None;
                }
                i += 2;
                while i < rest.len() && rest[i].kind != TokenKind::RParen {
                    if rest[i].kind != TokenKind::Word {
                        return None;
                    }
                    for part in rest[i].text.split('|') {
                        if !part.is_empty() && part != "or" {
                            types.push(OnlyRuleType {
                                name: part.to_string(),
                                is_reference: true,
                            });
                        }
                    }
                    i += 1;
                }
                if i == rest.len() {
                    return None; // unclosed paren
                }
                i += 1;
            }
            TokenKind::Word => {
                for part in token.text.split('|') {
                    if !part.is_empty() {
                        types.push(OnlyRuleType {
                            name: part.to_string(),
                            is_reference: false,
                        });
                    }
                }
                i += 1;
            }
            _ => return None,
        }
    }
    if types.is_empty() {
        return None;
    }
    Some(OnlyRule {
        path,
        types,
        location: location.clone(),
    })
}

fn parse_contains_rule(path: String, rest: &[Token], location: &Location) -> Option<ContainsRule> {
    let mut items = Vec::new();
    for group in split_on_word(rest, "and") {
        let mut words = group
            .iter()
            .filter(|t| t.kind == TokenKind::Word)
            .peekable();
        let first = words.next()?;
        // `Type named slice` or just `slice`
        let (type_name, name) = if words.peek().map(|t| t.text.as_str()) == Some("named") {
            words.next();
            (Some(first.text.clone()), words.next()?.text.clone())
        } else {
            (None, first.text.clone())
        };
        let mut item = ContainsItem {
            name,
            type_name,
            min: None,
            max: None,
            flags: FlagSet::default(),
        };
        for token in words {
            if let Some((min, max)) = parse_card(&token.text) {
                item.min = min;
                item.max = max;
            } else if is_flag_word(&token.text) {
                apply_flag(&mut item.flags, &token.text);
            } else {
                return None;
            }
        }
        items.push(item);
    }
    if items.is_empty() {
        return None;
    }
    Some(ContainsRule {
        path,
        items,
        location: location.clone(),
    })
}

fn split_on_word<'t>(tokens: &'t [Token], word: &str) -> Vec<&'t [Token]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Word && token.text == word {
            if i > start {
                groups.push(&tokens[start..i]);
            }
            start = i + 1;
        }
    }
    if start < tokens.len() {
        groups.push(&tokens[start..]);
    }
    groups
}

fn parse_caret_rule(
    path: String,
    caret_path: &str,
    rest: &[Token],
    location: &Location,
) -> Option<CaretValueRule> {
    if caret_path.is_empty() {
        return None;
    }
    if rest.first().map(|t| t.kind) != Some(TokenKind::Equals) {
        return None;
    }
    let (value, _) = parse_value_with_exactly(&rest[1..])?;
    Some(CaretValueRule {
        path,
        caret_path: caret_path.to_string(),
        value,
        location: location.clone(),
    })
}

fn parse_instance_rule(body: &[Token], location: &Location) -> Option<Rule> {
    let first = body.first()?;
    if first.kind == TokenKind::Word && first.text == "insert" {
        let name = body.get(1).filter(|t| t.kind == TokenKind::Word)?;
        return Some(Rule::Insert(InsertRule {
            rule_set: name.text.clone(),
            location: location.clone(),
        }));
    }
    if first.kind != TokenKind::Word {
        return None;
    }
    let path = first.text.clone();
    if body.get(1).map(|t| t.kind) != Some(TokenKind::Equals) {
        return None;
    }
    let (value, exactly) = parse_value_with_exactly(&body[2..])?;
    Some(Rule::Assignment(AssignmentRule {
        path,
        value,
        exactly,
        location: location.clone(),
    }))
}

// ============================================================================
// ValueSet / CodeSystem bodies
// ============================================================================

enum VsLine {
    Component(ValueSetComponent),
    Caret(CaretValueRule),
}

fn parse_valueset_line(body: &[Token], location: &Location) -> Option<VsLine> {
    let first = body.first()?;
    if first.kind == TokenKind::Word && first.text.starts_with('^') {
        return parse_caret_rule(String::new(), &first.text[1..], &body[1..], location)
            .map(VsLine::Caret);
    }

    let (include, rest) = match first.kind {
        TokenKind::Word if first.text == "include" => (true, &body[1..]),
        TokenKind::Word if first.text == "exclude" => (false, &body[1..]),
        _ => (true, body),
    };
    let content = parse_vs_content(rest)?;
    Some(VsLine::Component(ValueSetComponent {
        include,
        content,
        location: location.clone(),
    }))
}

fn parse_vs_content(rest: &[Token]) -> Option<ValueSetComponentContent> {
    let first = rest.first()?;
    if first.kind == TokenKind::Word && first.text == "codes" {
        // codes from system X [where prop op value [and ...]]
        // codes from valueset Y
        let from = rest.get(1)?;
        if from.kind != TokenKind::Word || from.text != "from" {
            return None;
        }
        let source_kind = rest.get(2)?;
        match source_kind.text.as_str() {
            "system" => {
                let system = rest.get(3).filter(|t| t.kind == TokenKind::Word)?;
                let mut filters = Vec::new();
                if let Some(where_pos) = rest
                    .iter()
                    .position(|t| t.kind == TokenKind::Word && t.text == "where")
                {
                    for group in split_on_word(&rest[where_pos + 1..], "and") {
                        filters.push(parse_vs_filter(group)?);
                    }
                } else if rest.len() > 4 {
                    return None;
                }
                Some(ValueSetComponentContent::System {
                    system: system.text.clone(),
                    filters,
                })
            }
            "valueset" => {
                let vs = rest.get(3).filter(|t| t.kind == TokenKind::Word)?;
                if rest.len() > 4 {
                    return None;
                }
                Some(ValueSetComponentContent::ValueSet {
                    value_set: vs.text.clone(),
                })
            }
            _ => None,
        }
    } else if first.kind == TokenKind::Word && first.text.contains('#') {
        // SYSTEM#code "display"
        let mut code = parse_code_word(&first.text)?;
        if let Some(display) = rest.get(1).filter(|t| t.kind == TokenKind::Str) {
            code.display = Some(display.text.clone());
        }
        if rest.len() > 2 {
            return None;
        }
        Some(ValueSetComponentContent::Concept(code))
    } else {
        None
    }
}

fn parse_vs_filter(group: &[Token]) -> Option<ValueSetFilterSpec> {
    let property = group.first().filter(|t| t.kind == TokenKind::Word)?;
    let op = group.get(1).filter(|t| t.kind == TokenKind::Word)?;
    let (value, _) = parse_value_with_exactly(&group[2..])?;
    Some(ValueSetFilterSpec {
        property: property.text.clone(),
        op: op.text.clone(),
        value,
    })
}

enum CsLine {
    Concept(ConceptDef),
    Caret(CaretValueRule),
}

fn parse_codesystem_line(body: &[Token], location: &Location) -> Option<CsLine> {
    let first = body.first()?;
    if first.kind == TokenKind::Word && first.text.starts_with('^') {
        return parse_caret_rule(String::new(), &first.text[1..], &body[1..], location)
            .map(CsLine::Caret);
    }

    // #parent #child "display" "definition" — leading codes are the ancestry
    let mut codes = Vec::new();
    let mut i = 0;
    while let Some(token) = body.get(i) {
        if token.kind == TokenKind::Word && token.text.starts_with('#') {
            codes.push(token.text[1..].to_string());
            i += 1;
        } else {
            break;
        }
    }
    if codes.is_empty() {
        return None;
    }
    let code = codes.pop().expect("at least one code");
    let display = body.get(i).filter(|t| t.kind == TokenKind::Str);
    let definition = body
        .get(i + 1)
        .filter(|t| matches!(t.kind, TokenKind::Str | TokenKind::MultilineStr));
    if body.len() > i + display.iter().count() + definition.iter().count() {
        return None;
    }
    Some(CsLine::Concept(ConceptDef {
        parents: codes,
        code,
        display: display.map(|t| t.text.clone()),
        definition: definition.map(|t| t.text.clone()),
        location: location.clone(),
    }))
}

// ============================================================================
// Values
// ============================================================================

/// Parse a value, honoring a trailing `(exactly)` marker
fn parse_value_with_exactly(tokens: &[Token]) -> Option<(FshValue, bool)> {
    let mut tokens = tokens;
    let mut exactly = false;
    if tokens.len() >= 3 {
        let tail = &tokens[tokens.len() - 3..];
        if tail[0].kind == TokenKind::LParen
            && tail[1].kind == TokenKind::Word
            && tail[1].text == "exactly"
            && tail[2].kind == TokenKind::RParen
        {
            exactly = true;
            tokens = &tokens[..tokens.len() - 3];
        }
    }
    parse_value(tokens).map(|v| (v, exactly))
}

pub(crate) fn parse_code_word(word: &str) -> Option<FshCode> {
    let hash = word.find('#')?;
    let system = &word[..hash];
    let code = &word[hash + 1..];
    if code.is_empty() {
        return None;
    }
    Some(FshCode {
        system: if system.is_empty() {
            None
        } else {
            Some(system.to_string())
        },
        code: code.to_string(),
        display: None,
    })
}

fn is_number(word: &str) -> bool {
    word.parse::<serde_json::Number>().is_ok()
}

/// Date, dateTime, and time lexemes are opaque; recognize the shapes without
/// validating the calendar
fn is_date_time(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => {}
        _ => return false,
    }
    !is_number(word) && word.chars().all(|c| {
        c.is_ascii_digit() || matches!(c, '-' | ':' | 'T' | 'Z' | '+' | '.')
    })
}

fn strip_single_quotes(word: &str) -> Option<&str> {
    word.strip_prefix('\'')?.strip_suffix('\'')
}

fn parse_quantity(tokens: &[Token]) -> Option<(FshQuantity, usize)> {
    let first = tokens.first()?;
    if first.kind != TokenKind::Word || !is_number(&first.text) {
        return None;
    }
    let value = first.text.parse::<serde_json::Number>().ok()?;
    let mut consumed = 1;
    let mut unit = None;
    if let Some(next) = tokens.get(1)
        && next.kind == TokenKind::Word
        && let Some(u) = strip_single_quotes(&next.text)
    {
        unit = Some(u.to_string());
        consumed = 2;
    }
    Some((FshQuantity { value, unit }, consumed))
}

fn parse_value(tokens: &[Token]) -> Option<FshValue> {
    let first = tokens.first()?;
    match first.kind {
        TokenKind::Str | TokenKind::MultilineStr => {
            if tokens.len() > 1 {
                return None;
            }
            Some(FshValue::String(first.text.clone()))
        }
        TokenKind::Word => {
            let word = first.text.as_str();
            if word == "true" || word == "false" {
                if tokens.len() > 1 {
                    return None;
                }
                return Some(FshValue::Boolean(word == "true"));
            }
            if word == "Reference" || word == "Canonical" {
                // Reference(Name) / Canonical(Name)
                if tokens.len() != 4
                    || tokens[1].kind != TokenKind::LParen
                    || tokens[2].kind != TokenKind::Word
                    || tokens[3].kind != TokenKind::RParen
                {
                    return None;
                }
                let target = tokens[2].text.clone();
                return Some(if word == "Reference" {
                    FshValue::Reference(target)
                } else {
                    FshValue::Canonical(target)
                });
            }
            if word.contains('#') {
                let mut code = parse_code_word(word)?;
                match tokens.len() {
                    1 => {}
                    2 if tokens[1].kind == TokenKind::Str => {
                        code.display = Some(tokens[1].text.clone());
                    }
                    _ => return None,
                }
                return Some(FshValue::Code(code));
            }
            if is_number(word) {
                let (quantity, consumed) = parse_quantity(tokens)?;
                let rest = &tokens[consumed..];
                if rest.is_empty() {
                    return Some(match quantity {
                        FshQuantity { unit: None, value } => FshValue::Number(value),
                        q => FshValue::Quantity(q),
                    });
                }
                // ratio: q1 : q2
                if rest[0].kind == TokenKind::Word && rest[0].text == ":" {
                    let (denominator, dconsumed) = parse_quantity(&rest[1..])?;
                    if rest.len() != 1 + dconsumed {
                        return None;
                    }
                    return Some(FshValue::Ratio(FshRatio {
                        numerator: quantity,
                        denominator,
                    }));
                }
                return None;
            }
            if is_date_time(word) {
                if tokens.len() > 1 {
                    return None;
                }
                return Some(FshValue::DateTime(word.to_string()));
            }
            // A bare name: a reference to another defined instance
            if tokens.len() > 1 {
                return None;
            }
            Some(FshValue::InstanceRef(word.to_string()))
        }
        _ => None,
    }
}
