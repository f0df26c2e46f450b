//! Typed transaction requests handed to the auto-journal engine.
//!
//! Each request exposes the amounts a posting rule may reference through
//! [`TransactionRequest::amount`]. A field the request does not carry yields `None`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerforge_core::{CompanyId, UserId};

pub mod source {
    pub const SALES: &str = "SALES";
    pub const PURCHASE: &str = "PURCHASE";
    pub const INVENTORY: &str = "INVENTORY";
    pub const PAYROLL: &str = "PAYROLL";
    pub const CASH_BANK: &str = "CASH_BANK";
}

/// Amount a posting rule can read from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountField {
    TotalAmount,
    TaxAmount,
    DiscountAmount,
    /// Total minus discount.
    NetAmount,
    GrossPay,
    NetPay,
    Deductions,
    TaxWithholding,
    InsuranceAmount,
    Amount,
}

impl AmountField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountField::TotalAmount => "total_amount",
            AmountField::TaxAmount => "tax_amount",
            AmountField::DiscountAmount => "discount_amount",
            AmountField::NetAmount => "net_amount",
            AmountField::GrossPay => "gross_pay",
            AmountField::NetPay => "net_pay",
            AmountField::Deductions => "deductions",
            AmountField::TaxWithholding => "tax_withholding",
            AmountField::InsuranceAmount => "insurance_amount",
            AmountField::Amount => "amount",
        }
    }
}

impl core::fmt::Display for AmountField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub company_id: CompanyId,
    /// Identifier of the source document; the idempotency key together with the module.
    pub source_id: String,
    /// Overrides the request's default transaction type when set.
    pub transaction_type: Option<String>,
    pub transaction_date: NaiveDate,
    pub currency_code: String,
    pub exchange_rate: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub created_by: UserId,
    /// Post the generated entry immediately; otherwise it stays a draft.
    pub auto_post: bool,
}

pub trait TransactionRequest: Send + Sync {
    fn header(&self) -> &TransactionHeader;

    fn source_module(&self) -> &'static str;

    fn default_transaction_type(&self) -> String;

    fn amount(&self, field: AmountField) -> Option<Decimal>;

    fn transaction_type(&self) -> String {
        match &self.header().transaction_type {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => self.default_transaction_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTransaction {
    pub header: TransactionHeader,
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,
}

impl TransactionRequest for SalesTransaction {
    fn header(&self) -> &TransactionHeader {
        &self.header
    }

    fn source_module(&self) -> &'static str {
        source::SALES
    }

    fn default_transaction_type(&self) -> String {
        match self.payment_method {
            PaymentMethod::Cash => "POS_CASH_SALE".to_string(),
            _ => "POS_CARD_SALE".to_string(),
        }
    }

    fn amount(&self, field: AmountField) -> Option<Decimal> {
        match field {
            AmountField::TotalAmount => Some(self.total_amount),
            AmountField::TaxAmount => Some(self.tax_amount),
            AmountField::DiscountAmount => Some(self.discount_amount),
            AmountField::NetAmount => Some(self.total_amount - self.discount_amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseTransaction {
    pub header: TransactionHeader,
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub supplier_id: Option<String>,
}

impl TransactionRequest for PurchaseTransaction {
    fn header(&self) -> &TransactionHeader {
        &self.header
    }

    fn source_module(&self) -> &'static str {
        source::PURCHASE
    }

    fn default_transaction_type(&self) -> String {
        "PURCHASE_ORDER_APPROVED".to_string()
    }

    fn amount(&self, field: AmountField) -> Option<Decimal> {
        match field {
            AmountField::TotalAmount => Some(self.total_amount),
            AmountField::TaxAmount => Some(self.tax_amount),
            AmountField::DiscountAmount => Some(self.discount_amount),
            AmountField::NetAmount => Some(self.total_amount - self.discount_amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receipt,
    Issue,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "RECEIPT",
            MovementType::Issue => "ISSUE",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub header: TransactionHeader,
    pub movement_type: MovementType,
    pub total_amount: Decimal,
    pub quantity: i64,
    pub warehouse_id: Option<String>,
}

impl TransactionRequest for InventoryTransaction {
    fn header(&self) -> &TransactionHeader {
        &self.header
    }

    fn source_module(&self) -> &'static str {
        source::INVENTORY
    }

    fn default_transaction_type(&self) -> String {
        format!("INVENTORY_{}", self.movement_type.as_str())
    }

    fn amount(&self, field: AmountField) -> Option<Decimal> {
        match field {
            AmountField::TotalAmount => Some(self.total_amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollTransaction {
    pub header: TransactionHeader,
    pub gross_pay: Decimal,
    pub net_pay: Decimal,
    pub deductions: Decimal,
    pub tax_withholding: Decimal,
    pub insurance_amount: Decimal,
    /// e.g. "2026-10".
    pub payroll_period: String,
}

impl TransactionRequest for PayrollTransaction {
    fn header(&self) -> &TransactionHeader {
        &self.header
    }

    fn source_module(&self) -> &'static str {
        source::PAYROLL
    }

    fn default_transaction_type(&self) -> String {
        "PAYROLL_PROCESSING".to_string()
    }

    fn amount(&self, field: AmountField) -> Option<Decimal> {
        match field {
            AmountField::GrossPay => Some(self.gross_pay),
            AmountField::NetPay => Some(self.net_pay),
            AmountField::Deductions => Some(self.deductions),
            AmountField::TaxWithholding => Some(self.tax_withholding),
            AmountField::InsuranceAmount => Some(self.insurance_amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashBankKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl CashBankKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashBankKind::Deposit => "DEPOSIT",
            CashBankKind::Withdrawal => "WITHDRAWAL",
            CashBankKind::Transfer => "TRANSFER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashBankTransaction {
    pub header: TransactionHeader,
    pub kind: CashBankKind,
    pub amount: Decimal,
    pub cash_account: Option<String>,
    pub to_cash_account: Option<String>,
}

impl TransactionRequest for CashBankTransaction {
    fn header(&self) -> &TransactionHeader {
        &self.header
    }

    fn source_module(&self) -> &'static str {
        source::CASH_BANK
    }

    fn default_transaction_type(&self) -> String {
        format!("CASH_BANK_{}", self.kind.as_str())
    }

    fn amount(&self, field: AmountField) -> Option<Decimal> {
        match field {
            AmountField::Amount => Some(self.amount),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn header(source_id: &str) -> TransactionHeader {
        TransactionHeader {
            company_id: CompanyId::new(),
            source_id: source_id.to_string(),
            transaction_type: None,
            transaction_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            currency_code: "IDR".to_string(),
            exchange_rate: Decimal::ONE,
            description: "POS sale".to_string(),
            reference: Some("INV-0001".to_string()),
            created_by: UserId::new(),
            auto_post: true,
        }
    }

    #[test]
    fn sales_defaults_follow_payment_method() {
        let mut sale = SalesTransaction {
            header: header("sale-1"),
            total_amount: dec!(1100000),
            tax_amount: dec!(100000),
            discount_amount: dec!(50000),
            payment_method: PaymentMethod::Cash,
            customer_id: None,
        };
        assert_eq!(sale.transaction_type(), "POS_CASH_SALE");
        assert_eq!(sale.amount(AmountField::NetAmount), Some(dec!(1050000)));
        assert_eq!(sale.amount(AmountField::GrossPay), None);

        sale.payment_method = PaymentMethod::Card;
        assert_eq!(sale.transaction_type(), "POS_CARD_SALE");

        sale.header.transaction_type = Some("ONLINE_SALE".into());
        assert_eq!(sale.transaction_type(), "ONLINE_SALE");
    }

    #[test]
    fn derived_transaction_types() {
        let inv = InventoryTransaction {
            header: header("mv-1"),
            movement_type: MovementType::Issue,
            total_amount: dec!(10),
            quantity: 2,
            warehouse_id: None,
        };
        assert_eq!(inv.transaction_type(), "INVENTORY_ISSUE");

        let cash = CashBankTransaction {
            header: header("cb-1"),
            kind: CashBankKind::Transfer,
            amount: dec!(5),
            cash_account: None,
            to_cash_account: None,
        };
        assert_eq!(cash.transaction_type(), "CASH_BANK_TRANSFER");
        assert_eq!(cash.source_module(), source::CASH_BANK);
    }
}
