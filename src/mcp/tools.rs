//! The MCP tools. Each one wraps the command handler of the same name.

use crate::args::{AddExpenseArgs, DeleteEntryArgs, LedgerArgs, SettleArgs, SummaryArgs};
use crate::commands::{self, Ledger};
use crate::mcp::mcp_utils::tool_result;
use crate::mcp::SettleServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ErrorData as McpError;
use rmcp::{tool, tool_router};
use tracing::info;

#[tool_router(vis = "pub(super)")]
impl SettleServer {
    #[tool]
    /// Initialize the settle MCP service for this session and return usage instructions. You
    /// **MUST** call this **ONCE** before using other tools so that you have the full usage
    /// instructions. You **MAY** call it more than once if you have forgotten the usage
    /// instructions.
    async fn initialize_service(&self) -> Result<CallToolResult, McpError> {
        let mut initialized = self.initialized.lock().await;
        *initialized = true;
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            include_str!("docs/INSTRUCTIONS.md"),
        )]))
    }

    /// Get the balance of every member of a group.
    ///
    /// A positive balance means the member is owed money, a negative balance means they owe money.
    /// The balances of a group always add up to zero. Deleted entries do not count.
    ///
    /// # Returns
    ///
    /// A readable summary and a JSON object of member ID to balance, in member order:
    ///
    /// ```json
    /// { "u1": 60.0, "shadow:3f2a9c0d1b7e4a55": -15.0, "u3": -45.0 }
    /// ```
    #[tool]
    async fn balances(
        &self,
        Parameters(args): Parameters<LedgerArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: balances called for {:?}", args.group);
        let ledger = Ledger::store((*self.config).clone(), args.group);
        tool_result(commands::balances(ledger).await)
    }

    /// Get the fewest payments that settle every balance in a group.
    ///
    /// The largest debtor always pays the largest creditor first, so a group where `n` members have
    /// a nonzero balance needs at most `n - 1` payments. Each suggestion carries the name, email
    /// and phone of both members so you can tell the user who to pay.
    ///
    /// To record one of these payments once it has been made, call `settle_debt` with the same
    /// `from`, `to` and `amount`.
    ///
    /// # Returns
    ///
    /// ```json
    /// [{ "from": { "id": "u3", "name": "Cleo" }, "to": { "id": "u1", "name": "Ana" }, "amount": 45.0 }]
    /// ```
    #[tool]
    async fn settlements(
        &self,
        Parameters(args): Parameters<LedgerArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: settlements called for {:?}", args.group);
        let ledger = Ledger::store((*self.config).clone(), args.group);
        tool_result(commands::settlements(ledger).await)
    }

    /// Add an expense to a group's ledger.
    ///
    /// Members can be given by ID or by name. Give each member's share in `splits`, or list the
    /// members in `equal` to split the amount equally (leftover cents go to the first members).
    ///
    /// # Rules
    ///
    /// - `amount` must be positive.
    /// - The payer and every member in the splits must belong to the group.
    /// - No member may appear twice in the splits.
    /// - The splits must add up to `amount` within 0.10.
    /// - The "Settlement" category is reserved. Use `settle_debt` to record payments.
    ///
    /// Pass a `key` to make the call safe to retry: a second call with the same key adds nothing.
    ///
    /// # Example
    ///
    /// ```json
    /// {
    ///   "group": "trip",
    ///   "amount": 42.5,
    ///   "payer": "Ana",
    ///   "equal": ["Ana", "Ben"],
    ///   "category": "Food",
    ///   "description": "Dinner"
    /// }
    /// ```
    #[tool]
    async fn add_expense(
        &self,
        Parameters(args): Parameters<AddExpenseArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: add_expense called for {:?}", args.group);
        let config = (*self.config).clone();
        tool_result(commands::add_expense(config, args).await)
    }

    /// Record that one member paid another, usually to carry out a suggestion from `settlements`.
    ///
    /// The payment is appended to the ledger and moves both balances toward zero. Calling this
    /// again with the same payment before any new expense is added records nothing, so it is safe
    /// to retry. Pass a `key` when the same payment is genuinely made twice.
    #[tool]
    async fn settle_debt(
        &self,
        Parameters(args): Parameters<SettleArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: settle_debt called for {:?}", args.group);
        let config = (*self.config).clone();
        tool_result(commands::settle(config, args).await)
    }

    /// Delete an expense by its entry ID. The entry stays in the ledger but no longer counts toward
    /// balances, settlements or spending. Settlement entries cannot be deleted.
    #[tool]
    async fn delete_entry(
        &self,
        Parameters(args): Parameters<DeleteEntryArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: delete_entry called for {}", args.id);
        let config = (*self.config).clone();
        tool_result(commands::delete_entry(config, args).await)
    }

    /// Show one person's position in a group: their balance, what they paid, their share of the
    /// spending, and the suggested payments they should make or receive.
    ///
    /// Identify the person by any of `account_id`, `email`, `phone` or `name`. Give everything you
    /// know: a person added before they had an account is only known by email, phone or name.
    #[tool]
    async fn summary(
        &self,
        Parameters(args): Parameters<SummaryArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: summary called for {:?}", args.group);
        let config = (*self.config).clone();
        tool_result(commands::summary(config, args).await)
    }

    /// Show how much a group spent in total, per category and per member. Settlements are
    /// transfers between members and are not counted as spending.
    #[tool]
    async fn spending(
        &self,
        Parameters(args): Parameters<LedgerArgs>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: spending called for {:?}", args.group);
        let ledger = Ledger::store((*self.config).clone(), args.group);
        tool_result(commands::spending(ledger).await)
    }
}
