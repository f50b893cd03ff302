use crate::args::SummaryArgs;
use crate::commands::{Ledger, Out};
use crate::error::{ErrorType, IntoResult};
use crate::model::{IdentitySet, MemberId};
use crate::settle::{summarize, UserSummary};
use crate::{Config, Result};
use anyhow::anyhow;
use std::fmt::Write;
use std::str::FromStr;

/// Shows one person's position in a group: their balance, what they paid, their share of the
/// spending and the suggested payments that involve them.
///
/// The person can be given by account ID, email, phone or name. Every member matching any of these
/// counts as them, which covers someone who was added once as a shadow member and once under their
/// account.
pub async fn summary(config: Config, args: SummaryArgs) -> Result<Out<UserSummary>> {
    let mut identity = IdentitySet::new();
    if let Some(id) = args.account_id.as_deref().filter(|s| !s.trim().is_empty()) {
        identity = identity.with_id(MemberId::from_str(id).pub_result(ErrorType::Request)?);
    }
    if let Some(email) = &args.email {
        identity = identity.with_email(email);
    }
    if let Some(phone) = &args.phone {
        identity = identity.with_phone(phone);
    }
    if let Some(name) = &args.name {
        identity = identity.with_name(name);
    }
    if identity.is_empty() {
        return Err(anyhow!(
            "Give an account ID, email, phone or name to summarize"
        ))
        .pub_result(ErrorType::Request);
    }

    let group = Ledger::store(config, args.group).load().await?;
    let Some(summary) = summarize(&identity, &group) else {
        return Err(anyhow!(
            "Nobody in '{}' matches the given identity",
            group.name
        ))
        .pub_result(ErrorType::Request);
    };

    let name = summary
        .members
        .first()
        .map(|m| m.name.as_str())
        .unwrap_or_default();
    let mut message = if summary.balance.is_negative() {
        format!("{name} owes {} in '{}'", summary.balance.abs(), group.name)
    } else if summary.balance.is_positive() {
        format!("{name} is owed {} in '{}'", summary.balance, group.name)
    } else {
        format!("{name} is settled up in '{}'", group.name)
    };
    for s in &summary.you_owe {
        let _ = write!(message, "\n  pay {} {}", s.to.name, s.amount);
    }
    for s in &summary.owed_to_you {
        let _ = write!(message, "\n  receive {} from {}", s.amount, s.from.name);
    }
    Ok(Out::new(message, summary))
}
