//! Rule matching and conditional branch resolution
//!
//! Rules are tried in declaration order and the first one whose `test` pattern
//! matches the request path (and whose `exclude` pattern does not) decides the
//! stage chain. Multiple matching rules are never merged. A rule either carries a
//! chain directly or a list of branches keyed on the request query, of which the
//! first matching one wins, falling back to the rule's default branch.

use std::fmt;

use log::trace;
use regex::Regex;

use crate::{error::PipelineError, stage::StageChain, types::Request};

/// Compiled regular expression that remembers its source text
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(source)?,
        })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// What decides whether a branch applies
#[derive(Debug, Clone)]
pub enum BranchPredicate {
    /// Matches when the request carries a query the pattern matches
    Query(Pattern),
    /// Taken only when no `Query` branch of the same rule matched
    Default,
}

impl BranchPredicate {
    fn matches(&self, query: Option<&str>) -> bool {
        match self {
            Self::Query(pattern) => query.is_some_and(|q| pattern.is_match(q)),
            Self::Default => false,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for BranchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(pattern) => write!(f, "query /{}/", pattern.as_str()),
            Self::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConditionalBranch {
    pub predicate: BranchPredicate,
    pub stages: StageChain,
}

impl ConditionalBranch {
    pub fn when_query(pattern: Pattern, stages: StageChain) -> Self {
        Self {
            predicate: BranchPredicate::Query(pattern),
            stages,
        }
    }

    pub fn default_branch(stages: StageChain) -> Self {
        Self {
            predicate: BranchPredicate::Default,
            stages,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RuleTarget {
    Direct(StageChain),
    Branching(Vec<ConditionalBranch>),
}

#[derive(Debug, Clone)]
pub struct Rule {
    test: Pattern,
    exclude: Option<Pattern>,
    target: RuleTarget,
}

impl Rule {
    pub fn new(test: Pattern, target: RuleTarget) -> Self {
        Self {
            test,
            exclude: None,
            target,
        }
    }

    #[must_use]
    pub fn excluding(mut self, exclude: Pattern) -> Self {
        self.exclude = Some(exclude);
        self
    }

    pub fn test(&self) -> &Pattern {
        &self.test
    }

    pub fn exclude(&self) -> Option<&Pattern> {
        self.exclude.as_ref()
    }

    pub fn target(&self) -> &RuleTarget {
        &self.target
    }

    /// Whether this rule is selected for `path`
    pub fn applies_to(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|e| e.is_match(path))
    }

    /// Every chain this rule can produce
    pub fn chains(&self) -> Vec<&StageChain> {
        match &self.target {
            RuleTarget::Direct(stages) => vec![stages],
            RuleTarget::Branching(branches) => branches.iter().map(|b| &b.stages).collect(),
        }
    }
}

/// Outcome of matching one request against the rule list
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMatch {
    Chain {
        rule_index: usize,
        branch_index: Option<usize>,
        stages: StageChain,
    },
    /// No rule applies; the file is used unmodified
    PassThrough,
}

impl RuleMatch {
    pub fn stages(&self) -> Option<&StageChain> {
        match self {
            Self::Chain { stages, .. } => Some(stages),
            Self::PassThrough => None,
        }
    }
}

/// Pick the first branch whose predicate matches `query`, else the default branch
pub fn resolve_branches<'a>(
    branches: &'a [ConditionalBranch],
    query: Option<&str>,
) -> Option<(usize, &'a StageChain)> {
    branches
        .iter()
        .position(|branch| branch.predicate.matches(query))
        .or_else(|| {
            branches
                .iter()
                .position(|branch| branch.predicate.is_default())
        })
        .map(|index| (index, &branches[index].stages))
}

/// Ordered, validated list of rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, PipelineError> {
        for (rule_index, rule) in rules.iter().enumerate() {
            if let RuleTarget::Branching(branches) = &rule.target {
                if branches.is_empty() {
                    return Err(PipelineError::RuleMisconfigured {
                        rule_index,
                        reason: "branching rule has no branches".to_owned(),
                    });
                }
                let defaults = branches.iter().filter(|b| b.predicate.is_default()).count();
                if defaults > 1 {
                    return Err(PipelineError::RuleMisconfigured {
                        rule_index,
                        reason: format!("{defaults} default branches; at most one is allowed"),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Select the stage chain for a request
    ///
    /// Returns [`RuleMatch::PassThrough`] when no rule applies. A branching rule
    /// that applies but has neither a matching nor a default branch is an error.
    pub fn match_request(&self, request: &Request) -> Result<RuleMatch, PipelineError> {
        let path = request.path();
        let Some((rule_index, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.applies_to(path))
        else {
            trace!("{request}: no rule matched, passing through");
            return Ok(RuleMatch::PassThrough);
        };

        match &rule.target {
            RuleTarget::Direct(stages) => {
                trace!("{request}: rule #{rule_index} -> {:?}", stages.names());
                Ok(RuleMatch::Chain {
                    rule_index,
                    branch_index: None,
                    stages: stages.clone(),
                })
            }
            RuleTarget::Branching(branches) => {
                let (branch_index, stages) = resolve_branches(branches, request.query())
                    .ok_or_else(|| PipelineError::NoBranchMatched {
                        path: request.to_string(),
                        rule_index,
                    })?;
                trace!(
                    "{request}: rule #{rule_index} branch #{branch_index} -> {:?}",
                    stages.names()
                );
                Ok(RuleMatch::Chain {
                    rule_index,
                    branch_index: Some(branch_index),
                    stages: stages.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageDescriptor;

    fn chain(names: &[&str]) -> StageChain {
        names.iter().map(|name| StageDescriptor::new(*name)).collect()
    }

    fn pattern(source: &str) -> Pattern {
        Pattern::new(source).unwrap()
    }

    fn style_rule() -> Rule {
        Rule::new(
            pattern(r"\.style$"),
            RuleTarget::Branching(vec![
                ConditionalBranch::when_query(pattern("module"), chain(&["scopedCss", "preprocess"])),
                ConditionalBranch::default_branch(chain(&["globalCss", "preprocess"])),
            ]),
        )
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = RuleSet::new(vec![
            Rule::new(pattern(r"\.ts$"), RuleTarget::Direct(chain(&["ts"]))),
            Rule::new(pattern(r"\.tsx?$"), RuleTarget::Direct(chain(&["tsx"]))),
        ])
        .unwrap();

        let matched = rules.match_request(&Request::parse("src/init.ts")).unwrap();
        assert_eq!(
            matched,
            RuleMatch::Chain {
                rule_index: 0,
                branch_index: None,
                stages: chain(&["ts"]),
            }
        );

        let matched = rules.match_request(&Request::parse("src/view.tsx")).unwrap();
        assert_eq!(matched.stages().unwrap().names(), vec!["tsx"]);
    }

    #[test]
    fn test_exclude_skips_rule_and_falls_through() {
        let rules = RuleSet::new(vec![
            Rule::new(pattern(r"\.js$"), RuleTarget::Direct(chain(&["babel"])))
                .excluding(pattern("node_modules")),
            Rule::new(pattern(r"\.js$"), RuleTarget::Direct(chain(&["raw"]))),
        ])
        .unwrap();

        let own = rules.match_request(&Request::parse("src/a.js")).unwrap();
        assert_eq!(own.stages().unwrap().names(), vec!["babel"]);

        let vendored = rules
            .match_request(&Request::parse("node_modules/lib/a.js"))
            .unwrap();
        assert_eq!(vendored.stages().unwrap().names(), vec!["raw"]);
    }

    #[test]
    fn test_no_rule_is_pass_through() {
        let rules = RuleSet::new(vec![style_rule()]).unwrap();
        let matched = rules.match_request(&Request::parse("fonts/a.woff2")).unwrap();
        assert_eq!(matched, RuleMatch::PassThrough);
    }

    #[test]
    fn test_query_marker_selects_scoped_branch() {
        let rules = RuleSet::new(vec![style_rule()]).unwrap();

        let scoped = rules
            .match_request(&Request::parse("button.style?module"))
            .unwrap();
        assert_eq!(
            scoped,
            RuleMatch::Chain {
                rule_index: 0,
                branch_index: Some(0),
                stages: chain(&["scopedCss", "preprocess"]),
            }
        );

        let global = rules.match_request(&Request::parse("theme.style")).unwrap();
        assert_eq!(
            global,
            RuleMatch::Chain {
                rule_index: 0,
                branch_index: Some(1),
                stages: chain(&["globalCss", "preprocess"]),
            }
        );
    }

    #[test]
    fn test_default_branch_position_does_not_shadow_later_branches() {
        let branches = vec![
            ConditionalBranch::default_branch(chain(&["fallback"])),
            ConditionalBranch::when_query(pattern("inline"), chain(&["inline"])),
        ];
        assert_eq!(resolve_branches(&branches, Some("inline")).unwrap().0, 1);
        assert_eq!(resolve_branches(&branches, Some("other")).unwrap().0, 0);
        assert_eq!(resolve_branches(&branches, None).unwrap().0, 0);
    }

    #[test]
    fn test_branching_rule_without_default_is_an_error() {
        let rules = RuleSet::new(vec![Rule::new(
            pattern(r"\.style$"),
            RuleTarget::Branching(vec![ConditionalBranch::when_query(
                pattern("module"),
                chain(&["scopedCss"]),
            )]),
        )])
        .unwrap();

        let err = rules
            .match_request(&Request::parse("theme.style"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoBranchMatched { ref path, rule_index: 0 } if path == "theme.style"
        ));
    }

    #[test]
    fn test_matching_is_deterministic() {
        let rules = RuleSet::new(vec![style_rule()]).unwrap();
        let request = Request::parse("button.style?module");
        let first = rules.match_request(&request).unwrap();
        for _ in 0..10 {
            assert_eq!(rules.match_request(&request).unwrap(), first);
        }
    }

    #[test]
    fn test_two_default_branches_rejected() {
        let err = RuleSet::new(vec![Rule::new(
            pattern(r"\.css$"),
            RuleTarget::Branching(vec![
                ConditionalBranch::default_branch(chain(&["a"])),
                ConditionalBranch::default_branch(chain(&["b"])),
            ]),
        )])
        .unwrap_err();
        assert!(matches!(err, PipelineError::RuleMisconfigured { rule_index: 0, .. }));
    }

    #[test]
    fn test_empty_branch_list_rejected() {
        let err = RuleSet::new(vec![
            Rule::new(pattern(r"\.js$"), RuleTarget::Direct(chain(&["raw"]))),
            Rule::new(pattern(r"\.css$"), RuleTarget::Branching(Vec::new())),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::RuleMisconfigured { rule_index: 1, .. }));
    }
}
