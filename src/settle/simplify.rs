use crate::model::{round2, Amount, Member, MemberId, Roster, EPSILON, UNKNOWN_NAME};
use crate::settle::{Balances, SettleError};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The contact card of a member as shown next to a suggested payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MemberView {
    pub id: MemberId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl From<&Member> for MemberView {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.clone(),
            name: member.name.clone(),
            email: member.email.clone(),
            phone: member.phone.clone(),
        }
    }
}

impl MemberView {
    fn lookup(id: &MemberId, roster: &Roster, balances: &Balances) -> Self {
        match roster.get(id) {
            Some(member) => member.into(),
            None => Self {
                id: id.clone(),
                name: balances.label(id).unwrap_or(UNKNOWN_NAME).to_string(),
                email: None,
                phone: None,
            },
        }
    }
}

/// A recommended payment: `from` pays `amount` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SettlementSuggestion {
    pub from: MemberView,
    pub to: MemberView,
    #[schemars(with = "f64")]
    pub amount: Amount,
}

/// A creditor or debtor with the amount still to be matched.
struct Party<'a> {
    id: &'a MemberId,
    remaining: Decimal,
}

/// Computes the payments that settle every balance.
///
/// Creditors and debtors are each sorted from largest to smallest, and the largest remaining debtor
/// always pays the largest remaining creditor as much as it can. Every step clears at least one of
/// the two, so `n` members with a nonzero balance need at most `n - 1` payments. Sorting is stable,
/// so equal amounts are matched in balance order.
///
/// Balances smaller than a cent are already settled and are left out. If credits and debits do not
/// add up to the same total, whatever is left over once one side runs out is dropped.
pub fn simplify(balances: &Balances, roster: &Roster) -> Vec<SettlementSuggestion> {
    let mut creditors = Vec::new();
    let mut debtors = Vec::new();
    for (id, balance) in balances.iter() {
        let value = balance.value();
        if value >= EPSILON {
            creditors.push(Party {
                id,
                remaining: value,
            });
        } else if value <= -EPSILON {
            debtors.push(Party {
                id,
                remaining: value.abs(),
            });
        }
    }
    creditors.sort_by(|a, b| b.remaining.cmp(&a.remaining));
    debtors.sort_by(|a, b| b.remaining.cmp(&a.remaining));

    let mut settlements = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < creditors.len() && j < debtors.len() {
        let creditor = &mut creditors[i];
        let debtor = &mut debtors[j];
        let payment = creditor.remaining.min(debtor.remaining);

        if payment >= EPSILON {
            settlements.push(SettlementSuggestion {
                from: MemberView::lookup(debtor.id, roster, balances),
                to: MemberView::lookup(creditor.id, roster, balances),
                amount: Amount::new(round2(payment)),
            });
        }

        creditor.remaining -= payment;
        debtor.remaining -= payment;
        if creditor.remaining < EPSILON {
            i += 1;
        }
        if debtor.remaining < EPSILON {
            j += 1;
        }
    }
    settlements
}

/// Checks that carrying out `suggestions` clears `balances`.
///
/// Every member who appears in a suggestion must end up with a net transfer equal to their balance,
/// within a cent. When the balances themselves do not add up to zero, the tolerance widens by that
/// imbalance, because `simplify` drops the unmatched tail of such input. Payers must be debtors and
/// payees creditors.
pub fn verify(balances: &Balances, suggestions: &[SettlementSuggestion]) -> Result<(), SettleError> {
    let mut net: IndexMap<&MemberId, Decimal> = IndexMap::new();
    for suggestion in suggestions {
        let (from, to) = (&suggestion.from.id, &suggestion.to.id);
        if !balances.get(from).is_negative() {
            return Err(SettleError::WrongDirection(from.clone()));
        }
        if !balances.get(to).is_positive() {
            return Err(SettleError::WrongDirection(to.clone()));
        }
        *net.entry(from).or_default() -= suggestion.amount.value();
        *net.entry(to).or_default() += suggestion.amount.value();
    }

    let tolerance = EPSILON + balances.total().value().abs();
    for (member, actual) in net {
        let expected = balances.get(member);
        if (expected.value() - actual).abs() > tolerance {
            return Err(SettleError::SettlementMismatch {
                member: member.clone(),
                expected,
                actual: Amount::new(actual),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn id(s: &str) -> MemberId {
        MemberId::account(s)
    }

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn balances(values: &[(&str, &str)]) -> Balances {
        values.iter().map(|(m, a)| (id(m), amt(a))).collect()
    }

    fn roster_of(values: &[(&str, &str)]) -> Roster {
        Roster::new(values.iter().map(|(m, _)| Member::with_account(*m, *m)))
    }

    fn run(values: &[(&str, &str)]) -> Vec<(String, String, Amount)> {
        let balances = balances(values);
        let suggestions = simplify(&balances, &roster_of(values));
        verify(&balances, &suggestions).unwrap();
        suggestions
            .into_iter()
            .map(|s| (s.from.id.to_string(), s.to.id.to_string(), s.amount))
            .collect()
    }

    fn transfers(expected: &[(&str, &str, &str)]) -> Vec<(String, String, Amount)> {
        expected
            .iter()
            .map(|(f, t, a)| (f.to_string(), t.to_string(), amt(a)))
            .collect()
    }

    #[rstest]
    #[case::one_creditor_three_debtors(
        &[("A", "300"), ("B", "-100"), ("C", "-100"), ("D", "-100")],
        &[("B", "A", "100"), ("C", "A", "100"), ("D", "A", "100")],
    )]
    #[case::largest_first(
        &[("X", "500"), ("Y", "-200"), ("Z", "-300")],
        &[("Z", "X", "300"), ("Y", "X", "200")],
    )]
    #[case::ties_follow_input_order(
        &[("P", "150"), ("Q", "150"), ("R", "-150"), ("S", "-150")],
        &[("R", "P", "150"), ("S", "Q", "150")],
    )]
    #[case::exact_pair(&[("A", "42.10"), ("B", "-42.10")], &[("B", "A", "42.10")])]
    #[case::dust_is_settled(&[("A", "0.005"), ("B", "-0.005")], &[])]
    #[case::all_zero(&[("A", "0"), ("B", "0"), ("C", "0")], &[])]
    #[case::empty(&[], &[])]
    #[case::one_cent_is_real(&[("A", "0.01"), ("B", "-0.01")], &[("B", "A", "0.01")])]
    #[case::split_across_creditors(
        &[("A", "70"), ("B", "30"), ("C", "-100")],
        &[("C", "A", "70"), ("C", "B", "30")],
    )]
    #[case::chain(
        &[("A", "60"), ("B", "-10"), ("C", "40"), ("D", "-90")],
        &[("D", "A", "60"), ("D", "C", "30"), ("B", "C", "10")],
    )]
    fn test_simplify_cases(#[case] input: &[(&str, &str)], #[case] expected: &[(&str, &str, &str)]) {
        assert_eq!(run(input), transfers(expected));
    }

    #[test]
    fn test_imbalanced_input_drops_tail() {
        let balances = balances(&[("A", "100"), ("B", "-60")]);
        let suggestions = simplify(&balances, &roster_of(&[("A", ""), ("B", "")]));
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].amount, amt("60"));
        assert_eq!(verify(&balances, &suggestions), Ok(()));
    }

    #[test]
    fn test_member_views_are_enriched() {
        let roster = Roster::new([
            Member::with_account("A", "Ana").email("ana@example.com"),
            Member::with_account("B", "Ben").phone("555-0100"),
        ]);
        let balances = balances(&[("A", "10"), ("B", "-10")]);
        let suggestions = simplify(&balances, &roster);
        assert_eq!(suggestions[0].from.name, "Ben");
        assert_eq!(suggestions[0].from.phone.as_deref(), Some("555-0100"));
        assert_eq!(suggestions[0].to.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_unknown_member_view() {
        let balances = balances(&[("A", "10"), ("ghost", "-10")]);
        let suggestions = simplify(&balances, &roster_of(&[("A", "")]));
        assert_eq!(suggestions[0].from.name, UNKNOWN_NAME);
    }

    #[test]
    fn test_verify_catches_wrong_amount() {
        let balances = balances(&[("A", "100"), ("B", "-100")]);
        let mut suggestions = simplify(&balances, &roster_of(&[("A", ""), ("B", "")]));
        suggestions[0].amount = amt("90");
        assert!(matches!(
            verify(&balances, &suggestions),
            Err(SettleError::SettlementMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_catches_wrong_direction() {
        let balances = balances(&[("A", "100"), ("B", "-100")]);
        let mut suggestions = simplify(&balances, &roster_of(&[("A", ""), ("B", "")]));
        let first = &mut suggestions[0];
        std::mem::swap(&mut first.from, &mut first.to);
        assert_eq!(
            verify(&balances, &suggestions),
            Err(SettleError::WrongDirection(id("A")))
        );
    }

    #[test]
    fn test_serialize_suggestion() {
        let balances = balances(&[("A", "12.5"), ("B", "-12.5")]);
        let suggestions = simplify(&balances, &roster_of(&[("A", ""), ("B", "")]));
        let json = serde_json::to_value(&suggestions).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "from": {"id": "B", "name": "B"},
                "to": {"id": "A", "name": "A"},
                "amount": 12.5
            }])
        );
    }

    /// Builds a balance map that sums to exactly zero from arbitrary cent values.
    fn zero_sum(cents: Vec<i64>) -> Balances {
        let total: i64 = cents.iter().sum();
        let mut values: Vec<(MemberId, Amount)> = cents
            .into_iter()
            .enumerate()
            .map(|(i, c)| (id(&format!("m{i}")), Amount::from_cents(c)))
            .collect();
        values.push((id("last"), Amount::from_cents(-total)));
        values.into_iter().collect()
    }

    proptest! {
        #[test]
        fn suggestions_clear_every_balance(cents in prop::collection::vec(-50_000i64..=50_000, 0..=12)) {
            let balances = zero_sum(cents);
            let suggestions = simplify(&balances, &Roster::default());

            let mut net: IndexMap<MemberId, Decimal> = IndexMap::new();
            for s in &suggestions {
                prop_assert!(s.amount.value() >= EPSILON);
                *net.entry(s.from.id.clone()).or_default() -= s.amount.value();
                *net.entry(s.to.id.clone()).or_default() += s.amount.value();
            }
            for (member, balance) in balances.iter() {
                let moved = net.get(member).copied().unwrap_or_default();
                prop_assert!((balance.value() - moved).abs() < EPSILON);
            }
            prop_assert_eq!(verify(&balances, &suggestions), Ok(()));
        }

        #[test]
        fn at_most_n_minus_one_payments(cents in prop::collection::vec(-50_000i64..=50_000, 0..=12)) {
            let balances = zero_sum(cents);
            let suggestions = simplify(&balances, &Roster::default());
            let nonzero = balances.nonzero_count();
            prop_assert!(suggestions.len() <= nonzero.saturating_sub(1));
        }

        #[test]
        fn simplify_is_deterministic(cents in prop::collection::vec(-50_000i64..=50_000, 0..=12)) {
            let balances = zero_sum(cents);
            prop_assert_eq!(
                simplify(&balances, &Roster::default()),
                simplify(&balances, &Roster::default())
            );
        }
    }
}
