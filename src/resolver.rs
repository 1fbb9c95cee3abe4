//! Recipient address rewriting.
//!
//! Resolves a recipient through alias, group-membership, and domain-alias
//! tables into zero or more final addresses. Resolution walks a directed
//! graph: address-level aliases chain, groups expand with each member
//! re-resolved independently, and domain aliases relocate whole domains
//! subject to the precedence policy. A cycle fails resolution for the
//! recipient whose ancestry repeats, never for its siblings, and is a
//! normal outcome, not an error.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::Address;

/// A directed rewrite mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteRule {
    /// One address forwards to another; chains.
    Alias { source: Address, target: Address },
    /// One address of the group's membership; a group fans out to all of
    /// its members, each re-resolved.
    GroupMember { group: Address, member: Address },
    /// Every address of `source` relocates to `target`, local part kept.
    DomainAlias { source: String, target: String },
}

/// Precedence between user-level aliases and domain aliases.
///
/// The observed behavior of the source system: once an address-level alias
/// has moved an address to a *different* domain, domain aliasing no longer
/// applies on that path, while alias targets that stayed in the aliased
/// domain keep chaining into the domain alias. Kept as a policy rather than
/// a hard-coded order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DomainAliasPolicy {
    #[default]
    SkipAfterCrossDomainAlias,
    AlwaysChain,
}

/// Outcome of resolving one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The final address set; a singleton `{input}` when no rule applies.
    Resolved(BTreeSet<Address>),
    /// The walk revisited an address in its own ancestry.
    Loop { path: Vec<Address> },
}

impl Resolution {
    pub fn is_loop(&self) -> bool {
        matches!(self, Self::Loop { .. })
    }

    pub fn addresses(&self) -> Option<&BTreeSet<Address>> {
        match self {
            Self::Resolved(addresses) => Some(addresses),
            Self::Loop { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    aliases: HashMap<Address, Address>,
    groups: HashMap<Address, Vec<Address>>,
    domains: HashMap<String, String>,
}

/// The rewrite-table resolver. Tables are runtime-mutable: the
/// administration surface adds and removes rules while messages resolve.
pub struct AddressResolver {
    tables: RwLock<Tables>,
    policy: DomainAliasPolicy,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressResolver {
    pub fn new() -> Self {
        Self::with_policy(DomainAliasPolicy::default())
    }

    pub fn with_policy(policy: DomainAliasPolicy) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            policy,
        }
    }

    pub fn policy(&self) -> DomainAliasPolicy {
        self.policy
    }

    pub async fn add_rule(&self, rule: RewriteRule) {
        let mut tables = self.tables.write().await;
        match rule {
            RewriteRule::Alias { source, target } => {
                debug!(%source, %target, "Adding alias mapping");
                tables.aliases.insert(source, target);
            }
            RewriteRule::GroupMember { group, member } => {
                debug!(%group, %member, "Adding group membership");
                let members = tables.groups.entry(group).or_default();
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            RewriteRule::DomainAlias { source, target } => {
                debug!(%source, %target, "Adding domain alias");
                tables
                    .domains
                    .insert(source.to_lowercase(), target.to_lowercase());
            }
        }
    }

    /// Remove a rule; returns whether it was present.
    pub async fn remove_rule(&self, rule: &RewriteRule) -> bool {
        let mut tables = self.tables.write().await;
        match rule {
            RewriteRule::Alias { source, target } => {
                if tables.aliases.get(source) == Some(target) {
                    tables.aliases.remove(source);
                    true
                } else {
                    false
                }
            }
            RewriteRule::GroupMember { group, member } => {
                let Some(members) = tables.groups.get_mut(group) else {
                    return false;
                };
                let before = members.len();
                members.retain(|m| m != member);
                let removed = members.len() != before;
                if members.is_empty() {
                    tables.groups.remove(group);
                }
                removed
            }
            RewriteRule::DomainAlias { source, target } => {
                let source = source.to_lowercase();
                if tables.domains.get(&source).map(String::as_str) == Some(&target.to_lowercase()) {
                    tables.domains.remove(&source);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Every configured rule, for enumeration by the administration surface.
    pub async fn rules(&self) -> Vec<RewriteRule> {
        let tables = self.tables.read().await;
        let mut rules = Vec::new();
        for (source, target) in &tables.aliases {
            rules.push(RewriteRule::Alias {
                source: source.clone(),
                target: target.clone(),
            });
        }
        for (group, members) in &tables.groups {
            for member in members {
                rules.push(RewriteRule::GroupMember {
                    group: group.clone(),
                    member: member.clone(),
                });
            }
        }
        for (source, target) in &tables.domains {
            rules.push(RewriteRule::DomainAlias {
                source: source.clone(),
                target: target.clone(),
            });
        }
        rules
    }

    /// Resolve one address to its final address set.
    pub async fn resolve(&self, address: &Address) -> Resolution {
        let tables = self.tables.read().await;
        let mut out = BTreeSet::new();
        let mut path = Vec::new();
        match walk(&tables, self.policy, address, &mut path, false, &mut out) {
            Ok(()) => Resolution::Resolved(out),
            Err(path) => {
                warn!(address = %address, ?path, "Rewrite loop detected");
                Resolution::Loop { path }
            }
        }
    }

    /// Resolve a batch, each address independently — a loop on one never
    /// affects its siblings.
    pub async fn resolve_all(&self, addresses: &[Address]) -> Vec<(Address, Resolution)> {
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            results.push((address.clone(), self.resolve(address).await));
        }
        results
    }
}

fn walk(
    tables: &Tables,
    policy: DomainAliasPolicy,
    address: &Address,
    path: &mut Vec<Address>,
    alias_crossed_domain: bool,
    out: &mut BTreeSet<Address>,
) -> Result<(), Vec<Address>> {
    if path.contains(address) {
        let mut loop_path = path.clone();
        loop_path.push(address.clone());
        return Err(loop_path);
    }
    path.push(address.clone());
    let result = step(tables, policy, address, path, alias_crossed_domain, out);
    path.pop();
    result
}

fn step(
    tables: &Tables,
    policy: DomainAliasPolicy,
    address: &Address,
    path: &mut Vec<Address>,
    alias_crossed_domain: bool,
    out: &mut BTreeSet<Address>,
) -> Result<(), Vec<Address>> {
    if let Some(target) = tables.aliases.get(address) {
        let crossed = alias_crossed_domain || target.domain() != address.domain();
        return walk(tables, policy, target, path, crossed, out);
    }

    if let Some(members) = tables.groups.get(address) {
        for member in members {
            walk(tables, policy, member, path, alias_crossed_domain, out)?;
        }
        return Ok(());
    }

    if let Some(target_domain) = tables.domains.get(address.domain()) {
        let applies = match policy {
            DomainAliasPolicy::AlwaysChain => true,
            DomainAliasPolicy::SkipAfterCrossDomainAlias => !alias_crossed_domain,
        };
        if applies && let Ok(moved) = address.with_domain(target_domain) {
            return walk(tables, policy, &moved, path, alias_crossed_domain, out);
        }
    }

    out.insert(address.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn alias(source: &str, target: &str) -> RewriteRule {
        RewriteRule::Alias {
            source: addr(source),
            target: addr(target),
        }
    }

    fn member(group: &str, member: &str) -> RewriteRule {
        RewriteRule::GroupMember {
            group: addr(group),
            member: addr(member),
        }
    }

    fn domain(source: &str, target: &str) -> RewriteRule {
        RewriteRule::DomainAlias {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    fn resolved(addrs: &[&str]) -> Resolution {
        Resolution::Resolved(addrs.iter().map(|a| addr(a)).collect())
    }

    #[tokio::test]
    async fn no_rules_resolves_to_self() {
        let resolver = AddressResolver::new();
        assert_eq!(
            resolver.resolve(&addr("alice@d.com")).await,
            resolved(&["alice@d.com"])
        );
    }

    #[tokio::test]
    async fn aliases_chain() {
        let resolver = AddressResolver::new();
        resolver.add_rule(alias("a@d.com", "b@d.com")).await;
        resolver.add_rule(alias("b@d.com", "c@d.com")).await;
        assert_eq!(resolver.resolve(&addr("a@d.com")).await, resolved(&["c@d.com"]));
    }

    #[tokio::test]
    async fn groups_expand_and_members_re_resolve() {
        let resolver = AddressResolver::new();
        resolver.add_rule(member("team@d.com", "alice@d.com")).await;
        resolver.add_rule(member("team@d.com", "bob@d.com")).await;
        resolver.add_rule(alias("alice@d.com", "alice@other.org")).await;

        assert_eq!(
            resolver.resolve(&addr("team@d.com")).await,
            resolved(&["alice@other.org", "bob@d.com"])
        );
    }

    #[tokio::test]
    async fn converging_paths_deduplicate() {
        let resolver = AddressResolver::new();
        resolver.add_rule(member("outer@d.com", "bob@d.com")).await;
        resolver.add_rule(member("outer@d.com", "inner@d.com")).await;
        resolver.add_rule(member("inner@d.com", "bob@d.com")).await;

        assert_eq!(
            resolver.resolve(&addr("outer@d.com")).await,
            resolved(&["bob@d.com"])
        );
    }

    #[tokio::test]
    async fn cycle_fails_only_the_affected_recipient() {
        let resolver = AddressResolver::new();
        resolver.add_rule(alias("a@d.com", "b@d.com")).await;
        resolver.add_rule(alias("b@d.com", "c@d.com")).await;
        resolver.add_rule(alias("c@d.com", "a@d.com")).await;
        resolver.add_rule(alias("d@d.com", "e@d.com")).await;

        let results = resolver
            .resolve_all(&[addr("a@d.com"), addr("d@d.com")])
            .await;

        match &results[0].1 {
            Resolution::Loop { path } => {
                assert_eq!(path.first(), Some(&addr("a@d.com")));
                assert_eq!(path.last(), Some(&addr("a@d.com")));
            }
            other => panic!("Expected loop, got {other:?}"),
        }
        assert_eq!(results[1].1, resolved(&["e@d.com"]));
    }

    #[tokio::test]
    async fn group_cycle_detected() {
        let resolver = AddressResolver::new();
        resolver.add_rule(member("g1@d.com", "g2@d.com")).await;
        resolver.add_rule(member("g2@d.com", "g1@d.com")).await;

        assert!(resolver.resolve(&addr("g1@d.com")).await.is_loop());
    }

    #[tokio::test]
    async fn domain_alias_relocates_local_part() {
        let resolver = AddressResolver::new();
        resolver.add_rule(domain("old.org", "new.org")).await;
        assert_eq!(
            resolver.resolve(&addr("alice@old.org")).await,
            resolved(&["alice@new.org"])
        );
    }

    #[tokio::test]
    async fn domain_alias_chains_after_same_domain_alias() {
        let resolver = AddressResolver::new();
        resolver.add_rule(alias("a@old.org", "b@old.org")).await;
        resolver.add_rule(domain("old.org", "new.org")).await;

        assert_eq!(
            resolver.resolve(&addr("a@old.org")).await,
            resolved(&["b@new.org"])
        );
    }

    #[tokio::test]
    async fn domain_alias_skipped_after_cross_domain_alias() {
        let resolver = AddressResolver::new();
        resolver.add_rule(alias("a@old.org", "b@other.net")).await;
        resolver.add_rule(domain("other.net", "moved.net")).await;

        // default policy: the user-level alias already moved the address
        // across domains, so other.net's domain alias does not apply
        assert_eq!(
            resolver.resolve(&addr("a@old.org")).await,
            resolved(&["b@other.net"])
        );
    }

    #[tokio::test]
    async fn always_chain_policy_keeps_applying_domain_aliases() {
        let resolver = AddressResolver::with_policy(DomainAliasPolicy::AlwaysChain);
        resolver.add_rule(alias("a@old.org", "b@other.net")).await;
        resolver.add_rule(domain("other.net", "moved.net")).await;

        assert_eq!(
            resolver.resolve(&addr("a@old.org")).await,
            resolved(&["b@moved.net"])
        );
    }

    #[tokio::test]
    async fn domain_alias_cycle_detected() {
        let resolver = AddressResolver::new();
        resolver.add_rule(domain("d1.org", "d2.org")).await;
        resolver.add_rule(domain("d2.org", "d1.org")).await;

        assert!(resolver.resolve(&addr("a@d1.org")).await.is_loop());
    }

    #[tokio::test]
    async fn remove_rule_restores_identity() {
        let resolver = AddressResolver::new();
        let rule = alias("a@d.com", "b@d.com");
        resolver.add_rule(rule.clone()).await;
        assert_eq!(resolver.resolve(&addr("a@d.com")).await, resolved(&["b@d.com"]));

        assert!(resolver.remove_rule(&rule).await);
        assert!(!resolver.remove_rule(&rule).await);
        assert_eq!(resolver.resolve(&addr("a@d.com")).await, resolved(&["a@d.com"]));
    }

    #[tokio::test]
    async fn rules_enumerates_all_tables() {
        let resolver = AddressResolver::new();
        resolver.add_rule(alias("a@d.com", "b@d.com")).await;
        resolver.add_rule(member("g@d.com", "m@d.com")).await;
        resolver.add_rule(domain("old.org", "new.org")).await;

        let rules = resolver.rules().await;
        assert_eq!(rules.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_group_member_ignored() {
        let resolver = AddressResolver::new();
        resolver.add_rule(member("g@d.com", "m@d.com")).await;
        resolver.add_rule(member("g@d.com", "m@d.com")).await;
        assert_eq!(resolver.rules().await.len(), 1);
    }
}
