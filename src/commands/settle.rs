use crate::args::SettleArgs;
use crate::commands::{resolve_member, Out};
use crate::db::EntryReceipt;
use crate::error::{ErrorType, IntoResult};
use crate::Config;
use crate::Result;
use anyhow::{anyhow, Context};
use tracing::warn;

/// Records that `from` paid `to`, usually to carry out a suggested settlement.
///
/// The payment is appended to the ledger as a settlement entry, which moves both balances toward
/// zero. Recording the same payment again before any new expense is added writes nothing, so a
/// retried request or a double click is harmless. Pass `key` to control that explicitly.
///
/// # Errors
/// - Returns a request error if either member is not in the group, the members are the same, or
///   the amount is not positive.
pub async fn settle(config: Config, args: SettleArgs) -> Result<Out<EntryReceipt>> {
    let group_id = config
        .group(args.group.as_deref())
        .pub_result(ErrorType::Request)?;
    let group = config
        .db()
        .load_group(group_id)
        .await
        .pub_result(ErrorType::Database)?;
    let roster = group.roster();

    let from = resolve_member(&roster, &args.from)
        .context("Invalid payer")
        .pub_result(ErrorType::Request)?;
    let to = resolve_member(&roster, &args.to)
        .context("Invalid payee")
        .pub_result(ErrorType::Request)?;
    if from == to {
        return Err(anyhow!("A member cannot settle with themselves"))
            .pub_result(ErrorType::Request);
    }
    if !args.amount.is_positive() {
        return Err(anyhow!(
            "A settlement must be a positive amount, got {}",
            args.amount
        ))
        .pub_result(ErrorType::Request);
    }

    let balances = group.balances();
    if !balances.get(&from).is_negative() || !balances.get(&to).is_positive() {
        warn!(
            "{} does not owe money to {}, recording the payment anyway",
            roster.display_name(&from.clone().into(), None),
            roster.display_name(&to.clone().into(), None),
        );
    }

    let receipt = config
        .db()
        .accept_settlement(group_id, &from, &to, args.amount, args.key.as_deref())
        .await
        .pub_result(ErrorType::Database)?;
    let message = if receipt.written {
        format!(
            "Recorded {} paying {} {}",
            roster.display_name(&from.into(), None),
            roster.display_name(&to.into(), None),
            args.amount
        )
    } else if let Some(key) = args.key.as_deref() {
        format!(
            "A payment with key '{key}' was already recorded as {}, nothing was added",
            receipt.entry_id
        )
    } else {
        format!(
            "This payment was already recorded as {}, nothing was added. If it really was paid \
             twice, record it again with a key of its own, such as the bank reference",
            receipt.entry_id
        )
    };
    Ok(Out::new(message, receipt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, MemberId};
    use crate::test::TestEnv;
    use std::str::FromStr;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn args(from: &str, to: &str, amount: &str) -> SettleArgs {
        SettleArgs {
            group: Some(TestEnv::TRIP.into()),
            from: from.into(),
            to: to.into(),
            amount: amt(amount),
            key: None,
        }
    }

    #[tokio::test]
    async fn test_settle_clears_balances() {
        let env = TestEnv::new().await;
        let [ana, ben, cleo] = env.trip().await;

        let out = settle(env.config(), args("Cleo", "Ana", "45")).await.unwrap();
        assert!(out.structure().unwrap().written);
        assert_eq!(out.message(), "Recorded Cleo paying Ana $45.00");
        settle(env.config(), args("Ben", "Ana", "15")).await.unwrap();

        let group = env.config().db().load_group(TestEnv::TRIP).await.unwrap();
        let balances = group.balances();
        for id in [&ana, &ben, &cleo] {
            assert_eq!(balances.get(id), Amount::ZERO);
        }
    }

    #[tokio::test]
    async fn test_settle_twice_records_once() {
        let env = TestEnv::new().await;
        env.trip().await;
        let first = settle(env.config(), args("Cleo", "Ana", "45")).await.unwrap();
        let second = settle(env.config(), args("cleo", "u1", "45")).await.unwrap();
        assert!(!second.structure().unwrap().written);
        assert_eq!(
            first.structure().unwrap().entry_id,
            second.structure().unwrap().entry_id
        );
        assert!(second.message().contains("already recorded"));
        assert!(second.message().contains("key of its own"), "{}", second.message());

        let mut third = args("Cleo", "Ana", "45");
        third.key = Some("bank-ref-7".into());
        let third = settle(env.config(), third).await.unwrap();
        assert!(third.structure().unwrap().written);
        let mut again = args("Cleo", "Ana", "45");
        again.key = Some("bank-ref-7".into());
        let again = settle(env.config(), again).await.unwrap();
        assert!(!again.structure().unwrap().written);
        assert!(!again.message().contains("key of its own"), "{}", again.message());
    }

    #[tokio::test]
    async fn test_settle_explicit_keys() {
        let env = TestEnv::new().await;
        env.trip().await;
        let mut a = args("Cleo", "Ana", "20");
        a.key = Some("transfer-1".into());
        let mut b = args("Cleo", "Ana", "20");
        b.key = Some("transfer-2".into());
        assert!(settle(env.config(), a).await.unwrap().structure().unwrap().written);
        assert!(settle(env.config(), b).await.unwrap().structure().unwrap().written);
        let group = env.config().db().load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(group.balances().get(&MemberId::account("u3")), amt("-5"));
    }

    #[tokio::test]
    async fn test_settle_rejects() {
        let env = TestEnv::new().await;
        env.trip().await;
        for bad in [
            args("Ana", "Ana", "5"),
            args("Zed", "Ana", "5"),
            args("Ben", "Ana", "0"),
            args("Ben", "Ana", "-5"),
        ] {
            let err = settle(env.config(), bad).await.unwrap_err();
            assert!(err.to_string().starts_with("request error"), "{err}");
        }
    }
}
