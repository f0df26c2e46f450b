//! Integration tests for the posting core.
//!
//! Tests: Budget Control Ledger, Auto-Journal Engine → Posting Engine → Store
//!
//! Verifies:
//! - Budget headroom is never oversold, also under concurrent commits
//! - Auto-journal attempts always leave a log row and replay instead of duplicating
//! - Posted entries are balanced at both currency levels and reversible exactly once

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, NaiveDate, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use ledgerforge_autojournal::{
        AmountField, AmountSource, AutoJournalConfig, AutoJournalLog, AutoJournalStatus, PaymentMethod,
        PostingRule, SalesTransaction, TransactionHeader,
    };
    use ledgerforge_budget::{
        BudgetLine, BudgetPolicy, BudgetStatus, BudgetType, CommitMode, CommitmentStatus, DocumentRef,
        MissingBudgetPolicy, NewBudget, ReferenceType,
    };
    use ledgerforge_core::{AccountId, AccountingPeriod, BudgetId, CompanyId, DomainError, JournalEntryId, UserId};
    use ledgerforge_journal::{
        EntryNumberFormat, JournalEntry, JournalEntryFilter, JournalEntryStatus, NewJournalEntry, NewJournalLine,
        Side,
    };

    use crate::{
        AutoJournalEngine, AutoJournalStore, BudgetLedger, CommitOutcome, CommitRequest, InMemoryLedgerStore,
        JournalStore, Ledger, LedgerConfig, LedgerError, PostingEngine, RealizeOutcome, RealizeRequest, StoreError,
        StoreResult,
    };

    fn domain(err: &LedgerError) -> &DomainError {
        err.as_domain().unwrap_or_else(|| panic!("expected a domain error, got {err:?}"))
    }

    fn ledger() -> Ledger<InMemoryLedgerStore> {
        ledgerforge_observability::init_for_tests();
        Ledger::in_memory(&LedgerConfig::default())
    }

    fn ledger_with_policy(policy: BudgetPolicy) -> Ledger<InMemoryLedgerStore> {
        ledgerforge_observability::init_for_tests();
        Ledger::in_memory(&LedgerConfig {
            budget_policy: policy,
            ..LedgerConfig::default()
        })
    }

    // Budgets

    async fn active_budget(
        budgets: &BudgetLedger<InMemoryLedgerStore>,
        company_id: CompanyId,
        account_id: AccountId,
        amount: Decimal,
    ) -> BudgetId {
        let budget = budgets
            .create_budget(
                NewBudget {
                    company_id,
                    code: "OPEX-2026".into(),
                    name: "Operating expenses 2026".into(),
                    fiscal_year: 2026,
                    budget_type: BudgetType::Annual,
                    period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    period_end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                    lines: vec![BudgetLine::new(account_id, amount)],
                },
                UserId::new(),
            )
            .await
            .unwrap();
        budgets.activate_budget(company_id, budget.id).await.unwrap();
        budget.id
    }

    fn commit_request(company_id: CompanyId, account_id: AccountId, amount: Decimal, po: &str) -> CommitRequest {
        CommitRequest {
            company_id,
            account_id,
            amount,
            fiscal_year: 2026,
            budget_id: None,
            reference: DocumentRef::new(ReferenceType::PurchaseOrder, po, format!("PO/{po}")),
            description: format!("Purchase order {po}"),
            committed_by: UserId::new(),
            mode: CommitMode::Enforce,
        }
    }

    fn realize_request(
        company_id: CompanyId,
        account_id: AccountId,
        amount: Decimal,
        commitment_id: Option<ledgerforge_core::CommitmentId>,
    ) -> RealizeRequest {
        RealizeRequest {
            company_id,
            account_id,
            amount,
            fiscal_year: 2026,
            budget_id: None,
            commitment_id,
            reference: DocumentRef::new(ReferenceType::GoodsReceipt, "gr-1", "GR/0001"),
            description: "Goods received".into(),
            transaction_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            realized_by: UserId::new(),
            mode: CommitMode::Enforce,
        }
    }

    fn committed(outcome: CommitOutcome) -> ledgerforge_budget::BudgetCommitment {
        match outcome {
            CommitOutcome::Committed(c) => c,
            other => panic!("expected a controlled commitment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_realize_walkthrough() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        active_budget(&ledger.budgets, company, account, dec!(1000000)).await;

        let po1 = committed(
            ledger
                .budgets
                .commit(commit_request(company, account, dec!(600000), "po-1"))
                .await
                .unwrap(),
        );
        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(1), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.available, dec!(400000));

        let err = ledger
            .budgets
            .commit(commit_request(company, account, dec!(500000), "po-2"))
            .await
            .unwrap_err();
        assert_eq!(
            domain(&err),
            &DomainError::InsufficientBudget {
                requested: dec!(500000),
                available: dec!(400000),
                shortfall: dec!(100000),
            }
        );

        let RealizeOutcome::Realized(realization) = ledger
            .budgets
            .realize(realize_request(company, account, dec!(600000), Some(po1.id)))
            .await
            .unwrap()
        else {
            panic!("expected a controlled realization");
        };
        assert_eq!(realization.budget_id, po1.budget_id);

        let po1 = ledger.budgets.get_commitment(company, po1.id).await.unwrap();
        assert_eq!(po1.status, CommitmentStatus::Realized);
        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(400000), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.available, dec!(400000));
        assert_eq!(availability.committed, Decimal::ZERO);
        assert_eq!(availability.realized, dec!(600000));
        assert!(availability.is_available);

        let err = ledger
            .budgets
            .realize(realize_request(company, account, dec!(1), Some(po1.id)))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::AlreadyRealized(_)));
    }

    #[tokio::test]
    async fn release_returns_headroom_once() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        active_budget(&ledger.budgets, company, account, dec!(1000)).await;

        let c = committed(
            ledger
                .budgets
                .commit(commit_request(company, account, dec!(800), "po-9"))
                .await
                .unwrap(),
        );

        let err = ledger.budgets.release(company, c.id, UserId::new(), "  ").await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::Validation(_)));

        let released = ledger
            .budgets
            .release(company, c.id, UserId::new(), "order cancelled")
            .await
            .unwrap();
        assert_eq!(released.status, CommitmentStatus::Released);
        assert_eq!(released.release_reason.as_deref(), Some("order cancelled"));

        let err = ledger
            .budgets
            .release(company, c.id, UserId::new(), "again")
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::AlreadyReleased(_)));

        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(1000), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.available, dec!(1000));

        let found = ledger
            .budgets
            .commitments_for_reference(company, ReferenceType::PurchaseOrder, "po-9")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, c.id);
    }

    #[tokio::test]
    async fn adjustments_are_checked_and_annotated() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        active_budget(&ledger.budgets, company, account, dec!(1000)).await;

        let RealizeOutcome::Realized(r) = ledger
            .budgets
            .realize(realize_request(company, account, dec!(700), None))
            .await
            .unwrap()
        else {
            panic!("expected a controlled realization");
        };

        let err = ledger
            .budgets
            .adjust_realization(company, r.id, dec!(1200), "invoice differs")
            .await
            .unwrap_err();
        assert!(matches!(
            domain(&err),
            DomainError::InsufficientBudget { shortfall, .. } if *shortfall == dec!(200)
        ));

        let adjusted = ledger
            .budgets
            .adjust_realization(company, r.id, dec!(650), "credit note")
            .await
            .unwrap();
        assert_eq!(adjusted.amount, dec!(650));
        assert_eq!(adjusted.description, "Goods received [Adjusted: credit note]");
        assert!(adjusted.adjusted_at.is_some());

        let summary = ledger.budgets.budget_summary(company, r.budget_id).await.unwrap();
        assert_eq!(summary.total_available, dec!(350));
        assert_eq!(summary.utilisation, dec!(65));
    }

    #[tokio::test]
    async fn missing_budget_follows_policy() {
        let (company, account) = (CompanyId::new(), AccountId::new());

        let lenient = ledger();
        let outcome = lenient
            .budgets
            .commit(commit_request(company, account, dec!(5), "po-1"))
            .await
            .unwrap();
        let CommitOutcome::Uncontrolled(availability) = outcome else {
            panic!("expected an uncontrolled commit");
        };
        assert!(availability.is_available);
        assert!(!availability.controlled);

        let strict = ledger_with_policy(BudgetPolicy {
            missing_budget: MissingBudgetPolicy::Deny,
            allow_commit_override: false,
        });
        let err = strict
            .budgets
            .check_availability(company, account, dec!(5), 2026, None)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn explicit_budget_without_the_account_is_unavailable() {
        let ledger = ledger();
        let company = CompanyId::new();
        let budget_id = active_budget(&ledger.budgets, company, AccountId::new(), dec!(100)).await;

        let other = AccountId::new();
        let availability = ledger
            .budgets
            .check_availability(company, other, dec!(1), 2026, Some(budget_id))
            .await
            .unwrap();
        assert!(availability.controlled);
        assert!(!availability.is_available);

        let mut request = commit_request(company, other, dec!(1), "po-1");
        request.budget_id = Some(budget_id);
        let err = ledger.budgets.commit(request).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(_)));
    }

    fn new_budget(company_id: CompanyId, code: &str, budget_type: BudgetType, lines: Vec<BudgetLine>) -> NewBudget {
        NewBudget {
            company_id,
            code: code.into(),
            name: format!("Budget {code}"),
            fiscal_year: 2026,
            budget_type,
            period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            lines,
        }
    }

    #[tokio::test]
    async fn sub_cent_amounts_are_rejected() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        active_budget(&ledger.budgets, company, account, dec!(100)).await;

        let err = ledger
            .budgets
            .commit(commit_request(company, account, dec!(0.004), "po-1"))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Validation(_)));
        let err = ledger
            .budgets
            .check_availability(company, account, dec!(0.004), 2026, None)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Validation(_)));

        let RealizeOutcome::Realized(r) = ledger
            .budgets
            .realize(realize_request(company, account, dec!(10), None))
            .await
            .unwrap()
        else {
            panic!("expected a controlled realization");
        };
        let err = ledger
            .budgets
            .adjust_realization(company, r.id, dec!(0.004), "rounding")
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Validation(_)));

        let found = ledger
            .budgets
            .commitments_for_reference(company, ReferenceType::PurchaseOrder, "po-1")
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(ledger.budgets.get_realization(company, r.id).await.unwrap().amount, dec!(10));
    }

    #[tokio::test]
    async fn availability_agrees_with_commit_on_inactive_budgets() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        let draft = ledger
            .budgets
            .create_budget(
                new_budget(company, "DRAFT", BudgetType::Annual, vec![BudgetLine::new(account, dec!(100))]),
                UserId::new(),
            )
            .await
            .unwrap();

        let err = ledger
            .budgets
            .check_availability(company, account, dec!(5), 2026, Some(draft.id))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));
        let mut request = commit_request(company, account, dec!(5), "po-1");
        request.budget_id = Some(draft.id);
        let err = ledger.budgets.commit(request).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));

        ledger.budgets.activate_budget(company, draft.id).await.unwrap();
        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(5), 2026, Some(draft.id))
            .await
            .unwrap();
        assert!(availability.is_available);

        ledger.budgets.close_budget(company, draft.id).await.unwrap();
        let err = ledger
            .budgets
            .check_availability(company, account, dec!(5), 2026, Some(draft.id))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));
    }

    #[tokio::test]
    async fn revision_cannot_take_an_occupied_active_slot() {
        let ledger = ledger();
        let company = CompanyId::new();
        let (quarterly_account, annual_account) = (AccountId::new(), AccountId::new());

        let quarterly = ledger
            .budgets
            .create_budget(
                new_budget(
                    company,
                    "Q-2026",
                    BudgetType::Quarterly,
                    vec![BudgetLine::new(quarterly_account, dec!(100))],
                ),
                UserId::new(),
            )
            .await
            .unwrap();
        ledger.budgets.activate_budget(company, quarterly.id).await.unwrap();
        active_budget(&ledger.budgets, company, annual_account, dec!(500)).await;

        // Turning the quarterly budget into a second annual one is refused.
        let err = ledger
            .budgets
            .revise_budget(
                company,
                quarterly.id,
                new_budget(
                    company,
                    "Q-2026-R1",
                    BudgetType::Annual,
                    vec![BudgetLine::new(quarterly_account, dec!(150))],
                ),
                UserId::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Conflict(_)));
        assert_eq!(
            ledger.budgets.get_budget(company, quarterly.id).await.unwrap().status,
            BudgetStatus::Active
        );

        let revision = ledger
            .budgets
            .revise_budget(
                company,
                quarterly.id,
                new_budget(
                    company,
                    "Q-2026-R1",
                    BudgetType::Quarterly,
                    vec![BudgetLine::new(quarterly_account, dec!(150))],
                ),
                UserId::new(),
            )
            .await
            .unwrap();
        assert_eq!(revision.status, BudgetStatus::Active);
        assert_eq!(
            ledger.budgets.get_budget(company, quarterly.id).await.unwrap().status,
            BudgetStatus::Revised
        );
    }

    #[tokio::test]
    async fn records_are_invisible_to_other_companies() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        let budget_id = active_budget(&ledger.budgets, company, account, dec!(100)).await;
        let commitment = committed(
            ledger
                .budgets
                .commit(commit_request(company, account, dec!(10), "po-1"))
                .await
                .unwrap(),
        );

        let stranger = CompanyId::new();
        let err = ledger.budgets.get_budget(stranger, budget_id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(msg) if msg.contains("budget")));
        let err = ledger
            .budgets
            .release(stranger, commitment.id, UserId::new(), "cancelled")
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(msg) if msg.contains("commitment")));
        assert_eq!(
            ledger.budgets.get_commitment(company, commitment.id).await.unwrap().status,
            CommitmentStatus::Active
        );
    }

    #[tokio::test]
    async fn override_requires_policy() {
        let (company, account) = (CompanyId::new(), AccountId::new());

        let strict = ledger();
        active_budget(&strict.budgets, company, account, dec!(100)).await;
        let mut request = commit_request(company, account, dec!(150), "po-1");
        request.mode = CommitMode::Override;
        let err = strict.budgets.commit(request.clone()).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));

        let lenient = ledger_with_policy(BudgetPolicy {
            allow_commit_override: true,
            ..BudgetPolicy::default()
        });
        active_budget(&lenient.budgets, company, account, dec!(100)).await;
        committed(lenient.budgets.commit(request).await.unwrap());
        let availability = lenient
            .budgets
            .check_availability(company, account, dec!(1), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.available, dec!(-50));
    }

    #[tokio::test]
    async fn budget_lifecycle_and_revision() {
        let ledger = ledger();
        let (company, account) = (CompanyId::new(), AccountId::new());
        let prior = active_budget(&ledger.budgets, company, account, dec!(100)).await;
        let c = committed(
            ledger
                .budgets
                .commit(commit_request(company, account, dec!(40), "po-1"))
                .await
                .unwrap(),
        );

        // A second active budget for the same year and type is rejected.
        let duplicate = ledger
            .budgets
            .create_budget(
                NewBudget {
                    company_id: company,
                    code: "OPEX-2026-B".into(),
                    name: "Duplicate".into(),
                    fiscal_year: 2026,
                    budget_type: BudgetType::Annual,
                    period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    period_end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                    lines: vec![BudgetLine::new(account, dec!(1))],
                },
                UserId::new(),
            )
            .await
            .unwrap();
        let err = ledger.budgets.activate_budget(company, duplicate.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::Conflict(_)));

        let revision = ledger
            .budgets
            .revise_budget(
                company,
                prior,
                NewBudget {
                    company_id: company,
                    code: "OPEX-2026-R1".into(),
                    name: "Operating expenses 2026 (revised)".into(),
                    fiscal_year: 2026,
                    budget_type: BudgetType::Annual,
                    period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    period_end: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                    lines: vec![BudgetLine::new(account, dec!(250))],
                },
                UserId::new(),
            )
            .await
            .unwrap();
        assert_eq!(revision.status, BudgetStatus::Active);
        assert_eq!(revision.revision_of, Some(prior));
        assert_eq!(
            ledger.budgets.get_budget(company, prior).await.unwrap().status,
            BudgetStatus::Revised
        );
        assert_eq!(ledger.budgets.get_commitment(company, c.id).await.unwrap().budget_id, prior);

        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(1), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.budget_id, Some(revision.id));
        assert_eq!(availability.available, dec!(250));

        ledger.budgets.close_budget(company, revision.id).await.unwrap();
        let outcome = ledger
            .budgets
            .commit(commit_request(company, account, dec!(1), "po-2"))
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Uncontrolled(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_commits_never_oversell() {
        let ledger = Arc::new(ledger());
        let (company, account) = (CompanyId::new(), AccountId::new());
        active_budget(&ledger.budgets, company, account, dec!(1000000)).await;

        let mut handles = Vec::new();
        for i in 0..25 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .budgets
                    .commit(commit_request(company, account, dec!(100000), &format!("po-{i}")))
                    .await
            }));
        }

        let (mut ok, mut insufficient) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                Ok(CommitOutcome::Committed(_)) => ok += 1,
                Err(err) if matches!(domain(&err), DomainError::InsufficientBudget { .. }) => insufficient += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(ok, 10);
        assert_eq!(insufficient, 15);

        let availability = ledger
            .budgets
            .check_availability(company, account, dec!(1), 2026, None)
            .await
            .unwrap();
        assert_eq!(availability.available, Decimal::ZERO);
    }

    #[derive(Debug, Clone)]
    enum BudgetOp {
        Commit(u32),
        Realize { amount: u32, consume: Option<usize> },
        Release(usize),
    }

    fn budget_op() -> impl Strategy<Value = BudgetOp> {
        prop_oneof![
            (1u32..400).prop_map(BudgetOp::Commit),
            ((1u32..400), proptest::option::of(0usize..8))
                .prop_map(|(amount, consume)| BudgetOp::Realize { amount, consume }),
            (0usize..8).prop_map(BudgetOp::Release),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn available_matches_active_and_realized_sums(ops in proptest::collection::vec(budget_op(), 1..24)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = Ledger::in_memory(&LedgerConfig::default());
                let (company, account) = (CompanyId::new(), AccountId::new());
                let budgeted = dec!(1000);
                active_budget(&ledger.budgets, company, account, budgeted).await;
                let mut commitments = Vec::new();

                for op in ops {
                    match op {
                        BudgetOp::Commit(amount) => {
                            let request = commit_request(company, account, Decimal::from(amount), "po");
                            if let Ok(CommitOutcome::Committed(c)) = ledger.budgets.commit(request).await {
                                commitments.push(c.id);
                            }
                        }
                        BudgetOp::Realize { amount, consume } => {
                            let linked = consume.and_then(|i| commitments.get(i).copied());
                            let request = realize_request(company, account, Decimal::from(amount), linked);
                            let _ = ledger.budgets.realize(request).await;
                        }
                        BudgetOp::Release(i) => {
                            if let Some(id) = commitments.get(i) {
                                let _ = ledger.budgets.release(company, *id, UserId::new(), "test").await;
                            }
                        }
                    }

                    let mut active = Decimal::ZERO;
                    for id in &commitments {
                        let c = ledger.budgets.get_commitment(company, *id).await.unwrap();
                        if c.status == CommitmentStatus::Active {
                            active += c.amount;
                        }
                    }
                    let availability = ledger
                        .budgets
                        .check_availability(company, account, dec!(1), 2026, None)
                        .await
                        .unwrap();
                    assert_eq!(availability.committed, active);
                    assert_eq!(availability.available, budgeted - active - availability.realized);
                    assert!(availability.available >= Decimal::ZERO);
                }
            });
        }
    }

    // Auto-journal

    struct SalesAccounts {
        cash: AccountId,
        revenue: AccountId,
        tax: AccountId,
    }

    fn sales_accounts() -> SalesAccounts {
        SalesAccounts {
            cash: AccountId::new(),
            revenue: AccountId::new(),
            tax: AccountId::new(),
        }
    }

    fn cash_sale_config(accounts: &SalesAccounts, revenue_amount: AmountSource) -> AutoJournalConfig {
        AutoJournalConfig::new(
            "SALES",
            "POS_CASH_SALE",
            "POS cash sale",
            true,
            BTreeMap::from([
                ("cash".to_string(), accounts.cash),
                ("revenue".to_string(), accounts.revenue),
                ("tax_payable".to_string(), accounts.tax),
            ]),
            vec![
                PostingRule {
                    role: "cash".into(),
                    amount: AmountSource::Field(AmountField::TotalAmount),
                    side: Side::Debit,
                    description_template: "Cash received {reference}".into(),
                },
                PostingRule {
                    role: "revenue".into(),
                    amount: revenue_amount,
                    side: Side::Credit,
                    description_template: "Sales {source_id}".into(),
                },
                PostingRule {
                    role: "tax_payable".into(),
                    amount: AmountSource::Field(AmountField::TaxAmount),
                    side: Side::Credit,
                    description_template: "VAT {source_id}".into(),
                },
            ],
        )
        .unwrap()
    }

    fn total_minus_tax() -> AmountSource {
        AmountSource::Difference {
            field: AmountField::TotalAmount,
            minus: AmountField::TaxAmount,
        }
    }

    fn cash_sale(company_id: CompanyId, source_id: &str) -> SalesTransaction {
        SalesTransaction {
            header: TransactionHeader {
                company_id,
                source_id: source_id.to_string(),
                transaction_type: None,
                transaction_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                currency_code: "IDR".into(),
                exchange_rate: Decimal::ONE,
                description: format!("POS sale {source_id}"),
                reference: Some(format!("RCPT-{source_id}")),
                created_by: UserId::new(),
                auto_post: true,
            },
            total_amount: dec!(1100000),
            tax_amount: dec!(100000),
            discount_amount: dec!(50000),
            payment_method: PaymentMethod::Cash,
            customer_id: None,
        }
    }

    #[tokio::test]
    async fn pos_cash_sale_posts_balanced_entry() {
        let ledger = ledger();
        let accounts = sales_accounts();
        ledger
            .auto_journal
            .register_config(cash_sale_config(&accounts, total_minus_tax()))
            .await
            .unwrap();

        let company = CompanyId::new();
        let sale = cash_sale(company, "sale-1");
        let generated = ledger.auto_journal.generate("SALES", "POS_CASH_SALE", &sale).await.unwrap();

        assert!(!generated.replayed);
        let entry = &generated.entry;
        assert_eq!(entry.status, JournalEntryStatus::Posted);
        assert_eq!(entry.entry_number.as_deref(), Some("JE202610-0001"));
        assert_eq!(entry.totals.debit, dec!(1100000));
        assert_eq!(entry.totals.credit, dec!(1100000));
        assert_eq!(entry.totals.base_debit, entry.totals.base_credit);
        assert_eq!(entry.lines[0].account_id, accounts.cash);
        assert_eq!(entry.lines[1].credit, dec!(1000000));
        assert_eq!(entry.lines[2].account_id, accounts.tax);

        assert_eq!(generated.log.status, AutoJournalStatus::Success);
        assert_eq!(generated.log.journal_entry_id, Some(entry.id));
        let logs = ledger.auto_journal.logs_for_source(company, "SALES", "sale-1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, AutoJournalStatus::Success);
    }

    #[tokio::test]
    async fn repeated_generation_replays() {
        let ledger = ledger();
        ledger
            .auto_journal
            .register_config(cash_sale_config(&sales_accounts(), total_minus_tax()))
            .await
            .unwrap();
        let company = CompanyId::new();
        let sale = cash_sale(company, "sale-7");

        let first = ledger.auto_journal.generate_default(&sale).await.unwrap();
        let second = ledger.auto_journal.generate_default(&sale).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.entry.id, first.entry.id);
        assert_eq!(second.log.id, first.log.id);

        let entries = ledger
            .posting
            .list(&JournalEntryFilter::company(company).from_source("SALES", Some("sale-7".into())))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn missing_config_is_logged_and_retryable() {
        let ledger = ledger();
        let company = CompanyId::new();
        let sale = cash_sale(company, "sale-2");

        let err = ledger.auto_journal.generate("SALES", "POS_CASH_SALE", &sale).await.unwrap_err();
        assert_eq!(
            domain(&err),
            &DomainError::ConfigNotFound {
                source_module: "SALES".into(),
                transaction_type: "POS_CASH_SALE".into(),
                inactive: false,
            }
        );
        let failed = ledger.auto_journal.failed_logs(company, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].journal_entry_id.is_none());
        assert!(failed[0].error_message.as_deref().unwrap_or_default().contains("POS_CASH_SALE"));
        let entries = ledger.posting.list(&JournalEntryFilter::company(company)).await.unwrap();
        assert!(entries.is_empty());

        let mut config = cash_sale_config(&sales_accounts(), total_minus_tax());
        config.set_active(false);
        ledger.auto_journal.register_config(config.clone()).await.unwrap();
        let err = ledger.auto_journal.generate_default(&sale).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::ConfigNotFound { inactive: true, .. }));

        config.set_active(true);
        ledger.auto_journal.register_config(config).await.unwrap();
        let generated = ledger.auto_journal.generate_default(&sale).await.unwrap();
        assert_eq!(generated.entry.status, JournalEntryStatus::Posted);

        let logs = ledger.auto_journal.logs_for_source(company, "SALES", "sale-2").await.unwrap();
        let statuses: Vec<_> = logs.iter().map(|l| l.status).collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses.iter().filter(|s| **s == AutoJournalStatus::Failed).count(), 2);
        assert_eq!(statuses.iter().filter(|s| **s == AutoJournalStatus::Success).count(), 1);
    }

    #[tokio::test]
    async fn unbalanced_mapping_is_rejected() {
        let ledger = ledger();
        // Revenue takes the full total, so credits exceed debits by the tax.
        ledger
            .auto_journal
            .register_config(cash_sale_config(
                &sales_accounts(),
                AmountSource::Field(AmountField::TotalAmount),
            ))
            .await
            .unwrap();
        let company = CompanyId::new();

        let err = ledger
            .auto_journal
            .generate_default(&cash_sale(company, "sale-3"))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotBalanced { .. }));
        let entries = ledger.posting.list(&JournalEntryFilter::company(company)).await.unwrap();
        assert!(entries.is_empty());
        let logs = ledger.auto_journal.logs_for_source(company, "SALES", "sale-3").await.unwrap();
        assert_eq!(logs[0].status, AutoJournalStatus::Failed);
    }

    #[tokio::test]
    async fn deferred_posting_leaves_a_draft() {
        let ledger = ledger();
        ledger
            .auto_journal
            .register_config(cash_sale_config(&sales_accounts(), total_minus_tax()))
            .await
            .unwrap();
        let company = CompanyId::new();
        let mut sale = cash_sale(company, "sale-4");
        sale.header.auto_post = false;

        let generated = ledger.auto_journal.generate_default(&sale).await.unwrap();
        assert_eq!(generated.entry.status, JournalEntryStatus::Draft);

        let posted = ledger
            .posting
            .post(company, generated.entry.id, UserId::new())
            .await
            .unwrap();
        assert_eq!(posted.status, JournalEntryStatus::Posted);
    }

    /// In-memory store whose next `complete_log` calls fail.
    struct FailingCompletions {
        inner: InMemoryLedgerStore,
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl JournalStore for FailingCompletions {
        async fn insert_entry(&self, entry: JournalEntry, numbering: &EntryNumberFormat) -> StoreResult<JournalEntry> {
            self.inner.insert_entry(entry, numbering).await
        }

        async fn get_entry(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>> {
            self.inner.get_entry(company_id, id).await
        }

        async fn list_entries(&self, filter: &JournalEntryFilter) -> StoreResult<Vec<JournalEntry>> {
            self.inner.list_entries(filter).await
        }

        async fn update_draft(&self, entry: JournalEntry) -> StoreResult<JournalEntry> {
            self.inner.update_draft(entry).await
        }

        async fn delete_draft(&self, company_id: CompanyId, id: JournalEntryId) -> StoreResult<()> {
            self.inner.delete_draft(company_id, id).await
        }

        async fn post_entry(
            &self,
            company_id: CompanyId,
            id: JournalEntryId,
            by: UserId,
            at: DateTime<Utc>,
        ) -> StoreResult<JournalEntry> {
            self.inner.post_entry(company_id, id, by, at).await
        }

        async fn reverse_entry(
            &self,
            company_id: CompanyId,
            id: JournalEntryId,
            reversal_id: JournalEntryId,
            numbering: &EntryNumberFormat,
            by: UserId,
            at: DateTime<Utc>,
        ) -> StoreResult<(JournalEntry, JournalEntry)> {
            self.inner
                .reverse_entry(company_id, id, reversal_id, numbering, by, at)
                .await
        }

        async fn next_entry_number(
            &self,
            company_id: CompanyId,
            period: AccountingPeriod,
            numbering: &EntryNumberFormat,
        ) -> StoreResult<String> {
            self.inner.next_entry_number(company_id, period, numbering).await
        }
    }

    #[async_trait::async_trait]
    impl AutoJournalStore for FailingCompletions {
        async fn find_config(
            &self,
            source_module: &str,
            transaction_type: &str,
        ) -> StoreResult<Option<AutoJournalConfig>> {
            self.inner.find_config(source_module, transaction_type).await
        }

        async fn upsert_config(&self, config: AutoJournalConfig) -> StoreResult<()> {
            self.inner.upsert_config(config).await
        }

        async fn insert_log(&self, log: AutoJournalLog) -> StoreResult<AutoJournalLog> {
            self.inner.insert_log(log).await
        }

        async fn complete_log(&self, log: &AutoJournalLog) -> StoreResult<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::backend("connection reset"));
            }
            self.inner.complete_log(log).await
        }

        async fn logs_by_source(
            &self,
            company_id: CompanyId,
            source_module: &str,
            source_id: &str,
        ) -> StoreResult<Vec<AutoJournalLog>> {
            self.inner.logs_by_source(company_id, source_module, source_id).await
        }

        async fn logs_by_status(
            &self,
            company_id: CompanyId,
            status: AutoJournalStatus,
            limit: usize,
        ) -> StoreResult<Vec<AutoJournalLog>> {
            self.inner.logs_by_status(company_id, status, limit).await
        }
    }

    #[tokio::test]
    async fn lost_success_log_is_completed_by_the_next_attempt() {
        ledgerforge_observability::init_for_tests();
        let store = Arc::new(FailingCompletions {
            inner: InMemoryLedgerStore::new(),
            failures: AtomicUsize::new(1),
        });
        let engine = AutoJournalEngine::new(PostingEngine::from_config(store, &LedgerConfig::default()));
        engine
            .register_config(cash_sale_config(&sales_accounts(), total_minus_tax()))
            .await
            .unwrap();
        let company = CompanyId::new();
        let sale = cash_sale(company, "sale-9");

        let first = engine.generate_default(&sale).await.unwrap();
        assert_eq!(first.entry.status, JournalEntryStatus::Posted);
        let logs = engine.logs_for_source(company, "SALES", "sale-9").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, AutoJournalStatus::Pending);

        let second = engine.generate_default(&sale).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.entry.id, first.entry.id);
        assert_eq!(second.log.id, logs[0].id);

        let logs = engine.logs_for_source(company, "SALES", "sale-9").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, AutoJournalStatus::Success);
        assert_eq!(logs[0].journal_entry_id, Some(first.entry.id));
        let entries = engine
            .posting()
            .list(&JournalEntryFilter::company(company))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        let third = engine.generate_default(&sale).await.unwrap();
        assert!(third.replayed);
        assert_eq!(third.entry.id, first.entry.id);
    }

    // Posting

    fn manual_entry(company_id: CompanyId, date: NaiveDate, debit: Decimal, credit: Decimal) -> NewJournalEntry {
        NewJournalEntry {
            company_id,
            entry_date: Some(date),
            description: "Office supplies".into(),
            reference: Some("MEMO-1".into()),
            currency_code: "IDR".into(),
            exchange_rate: Some(Decimal::ONE),
            source: None,
            lines: vec![
                NewJournalLine::debit(AccountId::new(), debit, "supplies expense"),
                NewJournalLine::credit(AccountId::new(), credit, "cash"),
            ],
        }
    }

    fn oct(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    #[tokio::test]
    async fn post_and_reverse_lifecycle() {
        let ledger = ledger();
        let company = CompanyId::new();
        let user = UserId::new();

        let unbalanced = ledger
            .posting
            .create(manual_entry(company, oct(1), dec!(100), dec!(90)), user)
            .await
            .unwrap();
        let err = ledger.posting.post(company, unbalanced.id, user).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotBalanced { .. }));
        let err = ledger.posting.check_balance(company, unbalanced.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotBalanced { .. }));

        let entry = ledger
            .posting
            .create(manual_entry(company, oct(2), dec!(250.005), dec!(250.005)), user)
            .await
            .unwrap();
        assert_eq!(entry.totals.debit, dec!(250.01));
        let posted = ledger.posting.post(company, entry.id, user).await.unwrap();
        assert_eq!(posted.posted_by, Some(user));
        let err = ledger.posting.post(company, entry.id, user).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));

        let (original, reversal) = ledger.posting.reverse(company, entry.id, user).await.unwrap();
        assert_eq!(original.status, JournalEntryStatus::Reversed);
        assert_eq!(original.reversal_entry_id, Some(reversal.id));
        assert_eq!(reversal.status, JournalEntryStatus::Posted);
        assert_eq!(reversal.reversal_of, Some(entry.id));
        assert_eq!(reversal.entry_date, Utc::now().date_naive());
        assert_eq!(reversal.reference, original.entry_number);
        for (o, r) in original.lines.iter().zip(&reversal.lines) {
            assert_eq!(o.debit, r.credit);
            assert_eq!(o.credit, r.debit);
            assert_eq!(o.account_id, r.account_id);
        }

        let err = ledger.posting.reverse(company, entry.id, user).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));
        let err = ledger.posting.post(company, entry.id, user).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));
        let err = ledger.posting.delete(company, entry.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidState(_)));

        let posted_only = ledger
            .posting
            .list(&JournalEntryFilter::company(company).with_status(JournalEntryStatus::Posted))
            .await
            .unwrap();
        assert_eq!(posted_only.len(), 1);
        assert_eq!(posted_only[0].id, reversal.id);
    }

    #[tokio::test]
    async fn entry_numbers_are_period_scoped_and_increasing() {
        let ledger = ledger();
        let company = CompanyId::new();
        let user = UserId::new();

        let a = ledger
            .posting
            .create(manual_entry(company, oct(3), dec!(1), dec!(1)), user)
            .await
            .unwrap();
        let b = ledger
            .posting
            .create(manual_entry(company, oct(30), dec!(1), dec!(1)), user)
            .await
            .unwrap();
        let nov = ledger
            .posting
            .create(
                manual_entry(company, NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(), dec!(1), dec!(1)),
                user,
            )
            .await
            .unwrap();
        assert_eq!(a.entry_number.as_deref(), Some("JE202610-0001"));
        assert_eq!(b.entry_number.as_deref(), Some("JE202610-0002"));
        assert_eq!(nov.entry_number.as_deref(), Some("JE202611-0001"));

        let next = ledger.posting.next_entry_number(company, oct(15)).await.unwrap();
        assert_eq!(next, "JE202610-0003");
        let next = ledger.posting.next_entry_number(company, oct(15)).await.unwrap();
        assert_eq!(next, "JE202610-0004");

        // Numbering is per company.
        let other = ledger
            .posting
            .create(manual_entry(CompanyId::new(), oct(3), dec!(1), dec!(1)), user)
            .await
            .unwrap();
        assert_eq!(other.entry_number.as_deref(), Some("JE202610-0001"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_get_distinct_numbers() {
        let ledger = Arc::new(ledger());
        let company = CompanyId::new();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .posting
                    .create(manual_entry(company, oct(5), dec!(10), dec!(10)), UserId::new())
                    .await
                    .map(|e| e.entry_number)
            }));
        }
        let mut numbers = HashSet::new();
        for handle in handles {
            let number = handle.await.unwrap().unwrap().unwrap();
            assert!(numbers.insert(number));
        }
        assert_eq!(numbers.len(), 40);
        assert!(numbers.contains("JE202610-0040"));
    }

    fn line_amount() -> impl Strategy<Value = Decimal> {
        (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn balanced_by_construction_entries_post(
            amounts in proptest::collection::vec(line_amount(), 1..6),
            rate_millis in 1i64..20_000_000,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = Ledger::in_memory(&LedgerConfig::default());
                let company = CompanyId::new();
                let user = UserId::new();

                // Each amount is debited on its own line and credited on its own line.
                let mut lines = Vec::new();
                for amount in &amounts {
                    lines.push(NewJournalLine::debit(AccountId::new(), *amount, "dr"));
                    lines.push(NewJournalLine::credit(AccountId::new(), *amount, "cr"));
                }
                let new = NewJournalEntry {
                    company_id: company,
                    entry_date: Some(oct(19)),
                    description: "generated".into(),
                    reference: None,
                    currency_code: "USD".into(),
                    exchange_rate: Some(Decimal::new(rate_millis, 3)),
                    source: None,
                    lines,
                };

                let entry = ledger.posting.create(new, user).await.unwrap();
                let posted = ledger.posting.post(company, entry.id, user).await.unwrap();
                assert_eq!(posted.totals.debit, posted.totals.credit);
                assert_eq!(posted.totals.base_debit, posted.totals.base_credit);
                assert_eq!(posted.status, JournalEntryStatus::Posted);
            });
        }
    }
}
