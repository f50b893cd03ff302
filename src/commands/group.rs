//! Group and member command handlers.

use crate::args::{AddMemberArgs, CreateGroupArgs};
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::model::{Member, MemberId};
use crate::{utils, Config, Result};
use anyhow::anyhow;
use serde::Serialize;
use std::str::FromStr;

/// The group that `create_group` made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedGroup {
    pub id: String,
    pub name: String,
    /// Whether the group is now the default group.
    pub default: bool,
}

/// Creates an empty group. The first group created, or any group created with `default`, becomes
/// the default group.
pub async fn create_group(mut config: Config, args: CreateGroupArgs) -> Result<Out<CreatedGroup>> {
    let name = args.name.trim();
    if name.is_empty() {
        return Err(anyhow!("A group needs a name")).pub_result(ErrorType::Request);
    }
    let id = match args.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => utils::generate_id("grp"),
    };

    config
        .db()
        .create_group(&id, name)
        .await
        .pub_result(ErrorType::Database)?;

    let default = args.default || config.default_group().is_none();
    if default {
        config
            .set_default_group(&id)
            .await
            .pub_result(ErrorType::Config)?;
    }

    let message = if default {
        format!("Created group '{name}' ({id}), now the default group")
    } else {
        format!("Created group '{name}' ({id})")
    };
    Ok(Out::new(
        message,
        CreatedGroup {
            id,
            name: name.to_string(),
            default,
        },
    ))
}

/// Adds a member to a group. Without an account ID the member gets the shadow ID of their email,
/// phone or name.
pub async fn add_member(config: Config, args: AddMemberArgs) -> Result<Out<Member>> {
    let group = config
        .group(args.group.as_deref())
        .pub_result(ErrorType::Request)?;
    let name = args.name.trim();
    if name.is_empty() {
        return Err(anyhow!("A member needs a name")).pub_result(ErrorType::Request);
    }

    let email = args.email.filter(|s| !s.trim().is_empty());
    let phone = args.phone.filter(|s| !s.trim().is_empty());
    let member = match args.account_id.as_deref() {
        Some(account) => {
            let id = MemberId::from_str(account).pub_result(ErrorType::Request)?;
            if id.is_shadow() {
                return Err(anyhow!(
                    "'{account}' is a shadow ID, which cannot be used as an account"
                ))
                .pub_result(ErrorType::Request);
            }
            Member {
                id,
                name: name.to_string(),
                email,
                phone,
            }
        }
        None => Member::shadow(name, email, phone),
    };

    config
        .db()
        .add_member(group, &member)
        .await
        .pub_result(ErrorType::Database)?;
    Ok(Out::new(
        format!("Added {} to '{group}' as {}", member.name, member.id),
        member,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    fn group_args(name: &str, id: Option<&str>, default: bool) -> CreateGroupArgs {
        CreateGroupArgs {
            name: name.into(),
            id: id.map(str::to_string),
            default,
        }
    }

    fn member_args(group: &str, name: &str) -> AddMemberArgs {
        AddMemberArgs {
            group: Some(group.into()),
            name: name.into(),
            email: None,
            phone: None,
            account_id: None,
        }
    }

    #[tokio::test]
    async fn test_first_group_becomes_default() {
        let env = TestEnv::new().await;
        let out = create_group(env.config(), group_args("Flat", Some("flat"), false))
            .await
            .unwrap();
        assert!(out.structure().unwrap().default);

        let out = create_group(env.config(), group_args("Trip", None, false))
            .await
            .unwrap();
        let created = out.structure().unwrap();
        assert!(!created.default);
        assert!(created.id.starts_with("grp-"));

        let reloaded = Config::load(env.config().root()).await.unwrap();
        assert_eq!(reloaded.default_group(), Some("flat"));
    }

    #[tokio::test]
    async fn test_create_group_with_default_flag() {
        let env = TestEnv::new().await;
        create_group(env.config(), group_args("Flat", Some("flat"), false))
            .await
            .unwrap();
        create_group(env.config(), group_args("Trip", Some("trip"), true))
            .await
            .unwrap();
        let reloaded = Config::load(env.config().root()).await.unwrap();
        assert_eq!(reloaded.default_group(), Some("trip"));
    }

    #[tokio::test]
    async fn test_add_member_shadow_and_account() {
        let env = TestEnv::new().await;
        create_group(env.config(), group_args("Flat", Some("flat"), false))
            .await
            .unwrap();

        let mut dan = member_args("flat", "Dan");
        dan.email = Some("Dan@Example.com".into());
        let out = add_member(env.config(), dan).await.unwrap();
        let member = out.structure().unwrap();
        assert!(member.id.is_shadow());
        assert_eq!(
            member.id,
            MemberId::shadow(Some("dan@example.com"), None, "whoever")
        );

        let mut eve = member_args("flat", "Eve");
        eve.account_id = Some("u5".into());
        let out = add_member(env.config(), eve).await.unwrap();
        assert_eq!(out.structure().unwrap().id, MemberId::account("u5"));

        let group = env.config().db().load_group("flat").await.unwrap();
        assert_eq!(group.members.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_names_are_request_errors() {
        let env = TestEnv::new().await;
        let err = create_group(env.config(), group_args("  ", Some("flat"), false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "request error: A group needs a name");

        create_group(env.config(), group_args("Flat", Some("flat"), false))
            .await
            .unwrap();
        let err = add_member(env.config(), member_args("flat", " "))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "request error: A member needs a name");
    }

    #[tokio::test]
    async fn test_add_member_rejects_shadow_account_id() {
        let env = TestEnv::new().await;
        create_group(env.config(), group_args("Flat", Some("flat"), false))
            .await
            .unwrap();
        let mut args = member_args("flat", "Mallory");
        args.account_id = Some("shadow:0123456789abcdef".into());
        let err = add_member(env.config(), args).await.unwrap_err();
        assert!(err.to_string().starts_with("request error"), "{err}");
    }

    #[tokio::test]
    async fn test_add_member_to_missing_group() {
        let env = TestEnv::new().await;
        let err = add_member(env.config(), member_args("nope", "Dan"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no group"), "{err}");
    }
}
