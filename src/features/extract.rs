//! Time-windowed aggregation of ledgers into a [`FeatureVector`].
//!
//! Pipeline:
//! 1. sort bank rows by date, keep the 3 busiest calendar months
//! 2. aggregate kept months (sum income/expense, last balance)
//! 3. left-join monthly card spend per category (missing ⇒ 0)
//! 4. derive savings, overdraft, category shares, card-payment ratios
//! 5. reduce to scalar features and least-squares trends
//!
//! Undefined ratios stay `None` all the way to the output.

use super::stats::{linear_slope, mean, mean_defined, ratio, sample_std, std_defined};
use crate::models::{BankTransaction, CardTransaction, FeatureVector, TransactionLedger};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Number of bank months kept for aggregation.
pub const TOP_MONTHS: usize = 3;

/// Months averaged into `last3_category_shares`.
pub const RECENT_SHARE_MONTHS: usize = 3;

/// Case-insensitive marker of card repayments in bank descriptions.
pub const CARD_PAYMENT_MARKER: &str = "credit card payment";

/// Card categories counted as discretionary spend.
pub const DISCRETIONARY_CATEGORIES: &[&str] = &["Entertainment", "Travel", "Dining"];

/// Calendar month as (year, month), ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

/// One kept month after the bank/card join.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAggregate {
    pub month: Month,
    pub income: f64,
    pub expense: f64,
    /// Last balance observed in the month
    pub balance: f64,
    pub card_payments: f64,
    /// Spend per category; every card category is present, 0 when absent.
    pub category_spend: BTreeMap<String, f64>,
    pub total_card_spend: f64,
}

impl MonthlyAggregate {
    pub fn net_savings(&self) -> f64 {
        self.income - self.expense
    }

    pub fn savings_rate(&self) -> Option<f64> {
        ratio(self.net_savings(), self.income)
    }

    pub fn overdraft(&self) -> bool {
        self.balance < 0.0
    }

    pub fn category_share(&self, category: &str) -> Option<f64> {
        let spend = self.category_spend.get(category).copied().unwrap_or(0.0);
        ratio(spend, self.total_card_spend)
    }

    pub fn card_payment_ratio(&self) -> Option<f64> {
        ratio(self.card_payments, self.total_card_spend)
    }
}

/// Deterministic feature extraction. Identical ledgers give identical output.
pub fn extract(ledger: &TransactionLedger) -> FeatureVector {
    let categories = card_categories(&ledger.card);
    let rows = monthly_aggregates(ledger);

    let incomes: Vec<f64> = rows.iter().map(|r| r.income).collect();
    let expenses: Vec<f64> = rows.iter().map(|r| r.expense).collect();
    let savings: Vec<f64> = rows.iter().map(|r| r.net_savings()).collect();
    let overdrafts: Vec<f64> = rows
        .iter()
        .map(|r| if r.overdraft() { 1.0 } else { 0.0 })
        .collect();

    let total_spend: f64 = rows.iter().map(|r| r.total_card_spend).sum();

    let discretionary_spend: f64 = rows
        .iter()
        .flat_map(|r| r.category_spend.iter())
        .filter(|(category, _)| is_discretionary(category))
        .map(|(_, spend)| spend)
        .sum();

    let (top_category_share, category_volatility) = if categories.is_empty() {
        (Some(0.0), Some(0.0))
    } else {
        let top = categories
            .iter()
            .map(|c| rows.iter().map(|r| r.category_spend[c.as_str()]).sum::<f64>())
            .fold(f64::NEG_INFINITY, f64::max);
        let volatility = mean_defined(
            categories
                .iter()
                .map(|c| std_defined(rows.iter().map(|r| r.category_share(c)))),
        );
        (ratio(top, total_spend), volatility)
    };

    let (income_trend, expense_trend, savings_trend) = if rows.len() > 1 {
        (
            linear_slope(&incomes),
            linear_slope(&expenses),
            linear_slope(&savings),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let features = FeatureVector {
        income_mean: mean(&incomes),
        income_std: sample_std(&incomes),
        expense_mean: mean(&expenses),
        expense_std: sample_std(&expenses),
        savings_rate_mean: mean_defined(rows.iter().map(|r| r.savings_rate())),
        overdraft_frequency: mean(&overdrafts),
        discretionary_share: ratio(discretionary_spend, total_spend),
        top_category_share,
        category_volatility,
        cc_payment_ratio_mean: mean_defined(rows.iter().map(|r| r.card_payment_ratio())),
        last3_category_shares: recent_category_shares(&ledger.card),
        income_trend,
        expense_trend,
        savings_trend,
    };

    debug!(months = rows.len(), categories = categories.len(), "Features extracted");
    features
}

/// Bank months kept for aggregation, busiest first; ties go to the more
/// recent month.
pub fn select_top_months(bank: &[BankTransaction], limit: usize) -> BTreeSet<Month> {
    let mut counts: HashMap<Month, usize> = HashMap::new();
    for tx in bank {
        *counts.entry(Month::of(tx.date)).or_insert(0) += 1;
    }

    let mut ranked: Vec<(Month, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(month_a, count_a), (month_b, count_b)| {
        count_b.cmp(count_a).then(month_b.cmp(month_a))
    });

    ranked.into_iter().take(limit).map(|(month, _)| month).collect()
}

/// Joined monthly rows for the kept bank months, in chronological order.
pub fn monthly_aggregates(ledger: &TransactionLedger) -> Vec<MonthlyAggregate> {
    let mut bank: Vec<&BankTransaction> = ledger.bank.iter().collect();
    // stable: same-day rows keep file order, so "last balance" is the last row
    bank.sort_by_key(|tx| tx.date);

    let kept = select_top_months(&ledger.bank, TOP_MONTHS);
    let categories = card_categories(&ledger.card);
    let card_by_month = card_spend_by_month(&ledger.card);

    let mut rows: BTreeMap<Month, MonthlyAggregate> = BTreeMap::new();
    for tx in bank {
        let month = Month::of(tx.date);
        if !kept.contains(&month) {
            continue;
        }

        let row = rows.entry(month).or_insert_with(|| MonthlyAggregate {
            month,
            income: 0.0,
            expense: 0.0,
            balance: 0.0,
            card_payments: 0.0,
            category_spend: BTreeMap::new(),
            total_card_spend: 0.0,
        });
        row.income += tx.income;
        row.expense += tx.expense;
        row.balance = tx.balance;
        if tx.description.to_lowercase().contains(CARD_PAYMENT_MARKER) {
            row.card_payments += tx.expense;
        }
    }

    for row in rows.values_mut() {
        let spend = card_by_month.get(&row.month);
        row.category_spend = categories
            .iter()
            .map(|c| {
                let amount = spend.and_then(|s| s.get(c)).copied().unwrap_or(0.0);
                (c.clone(), amount)
            })
            .collect();
        row.total_card_spend = row.category_spend.values().sum();
    }

    rows.into_values().collect()
}

/// Average category share over the last three calendar months of card data.
pub fn recent_category_shares(card: &[CardTransaction]) -> BTreeMap<String, Option<f64>> {
    let categories = card_categories(card);
    let by_month = card_spend_by_month(card);

    let recent: Vec<&BTreeMap<String, f64>> = by_month
        .values()
        .rev()
        .take(RECENT_SHARE_MONTHS)
        .collect();

    categories
        .iter()
        .map(|category| {
            let shares = recent.iter().map(|spend| {
                let total: f64 = spend.values().sum();
                ratio(spend.get(category).copied().unwrap_or(0.0), total)
            });
            (category.clone(), mean_defined(shares))
        })
        .collect()
}

fn card_categories(card: &[CardTransaction]) -> BTreeSet<String> {
    card.iter().map(|tx| tx.category.clone()).collect()
}

fn card_spend_by_month(card: &[CardTransaction]) -> BTreeMap<Month, BTreeMap<String, f64>> {
    let mut by_month: BTreeMap<Month, BTreeMap<String, f64>> = BTreeMap::new();
    for tx in card {
        *by_month
            .entry(Month::of(tx.date))
            .or_default()
            .entry(tx.category.clone())
            .or_insert(0.0) += tx.amount_paid;
    }
    by_month
}

fn is_discretionary(category: &str) -> bool {
    DISCRETIONARY_CATEGORIES
        .iter()
        .any(|d| d.eq_ignore_ascii_case(category))
}
