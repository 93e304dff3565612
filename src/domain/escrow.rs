//! Escrow holds on marketplace orders.
//!
//! The buyer's money has already been captured into the platform pool when an
//! escrow account is opened. The account tracks how much of it may still be
//! released to the seller, either all at once or milestone by milestone.

use super::UserId;
use super::money::{Amount, Money};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Active,
    Released,
    Disputed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    Pending,
    Funded,
    Released,
    Disputed,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Buyer,
    Seller,
}

/// A milestone as proposed when the escrow is opened.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct MilestonePlan {
    pub description: String,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub release_conditions: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EscrowMilestone {
    pub id: Uuid,
    pub description: String,
    pub amount: Amount,
    pub status: MilestoneStatus,
    pub due_date: DateTime<Utc>,
    pub release_conditions: String,
    pub approved_by_buyer: bool,
    pub approved_by_seller: bool,
}

impl EscrowMilestone {
    pub fn is_releasable(&self) -> bool {
        self.status == MilestoneStatus::Funded && self.approved_by_buyer && self.approved_by_seller
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EscrowAccount {
    pub id: Uuid,
    pub order_id: String,
    pub amount: Amount,
    pub currency: String,
    pub status: EscrowStatus,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub created_at: DateTime<Utc>,
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub milestones: Vec<EscrowMilestone>,
}

/// Money moved by releasing one milestone.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct MilestoneRelease {
    pub amount: Amount,
    /// Set when this was the last open milestone and the milestones did not
    /// cover the whole hold. That remainder goes back to the buyer.
    pub unallocated: Option<Amount>,
}

impl EscrowAccount {
    pub fn open(
        order_id: &str,
        amount: Amount,
        currency: &str,
        buyer_id: &str,
        seller_id: &str,
        plans: Vec<MilestonePlan>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if order_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Escrow needs an order id".to_string(),
            ));
        }
        if buyer_id == seller_id {
            return Err(LedgerError::ValidationError(format!(
                "Buyer and seller of order {order_id} must differ"
            )));
        }
        let planned = Money::checked_sum(plans.iter().map(|plan| plan.amount.value()))
            .unwrap_or(Money::new(i64::MAX));
        if planned > amount.value() {
            return Err(LedgerError::ValidationError(format!(
                "Milestones for order {order_id} total {planned}, more than the {amount} held"
            )));
        }
        let milestones = plans
            .into_iter()
            .map(|plan| EscrowMilestone {
                id: Uuid::new_v4(),
                description: plan.description,
                amount: plan.amount,
                status: MilestoneStatus::Pending,
                due_date: plan.due_date,
                release_conditions: plan.release_conditions,
                approved_by_buyer: false,
                approved_by_seller: false,
            })
            .collect();
        Ok(Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            amount,
            currency: currency.to_string(),
            status: EscrowStatus::Active,
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            created_at: now,
            release_date: None,
            milestones,
        })
    }

    pub fn involves(&self, user: &str) -> bool {
        self.buyer_id == user || self.seller_id == user
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status == EscrowStatus::Active {
            Ok(())
        } else {
            Err(LedgerError::invalid_state(
                "escrow",
                self.id,
                format!("escrow is {:?}", self.status),
            ))
        }
    }

    /// Money already paid out through milestone releases.
    pub fn released_amount(&self) -> Money {
        self.milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Released)
            .map(|m| m.amount.value())
            .sum()
    }

    /// Money still held for this order.
    pub fn remaining(&self) -> Money {
        self.amount.value() - self.released_amount()
    }

    /// What the platform pool still owes on this escrow. Zero once it is
    /// released or refunded.
    pub fn held(&self) -> Money {
        match self.status {
            EscrowStatus::Active | EscrowStatus::Disputed => self.remaining(),
            EscrowStatus::Released | EscrowStatus::Refunded => Money::ZERO,
        }
    }

    fn milestone_mut(&mut self, milestone_id: Uuid) -> Result<&mut EscrowMilestone> {
        self.milestones
            .iter_mut()
            .find(|m| m.id == milestone_id)
            .ok_or_else(|| LedgerError::not_found("milestone", milestone_id))
    }

    /// Releases everything still held. Returns the amount owed to the seller.
    pub fn release_all(&mut self, now: DateTime<Utc>) -> Result<Amount> {
        self.ensure_active()?;
        if let Some(disputed) = self
            .milestones
            .iter()
            .find(|m| m.status == MilestoneStatus::Disputed)
        {
            return Err(LedgerError::invalid_state(
                "escrow",
                self.id,
                format!("milestone {} is disputed", disputed.id),
            ));
        }
        let owed = Amount::try_from(self.remaining())?;
        for milestone in &mut self.milestones {
            milestone.status = MilestoneStatus::Released;
        }
        self.status = EscrowStatus::Released;
        self.release_date = Some(now);
        Ok(owed)
    }

    /// Returns everything still held. Returns the amount owed to the buyer.
    pub fn refund(&mut self) -> Result<Amount> {
        self.ensure_active()?;
        let owed = Amount::try_from(self.remaining())?;
        self.status = EscrowStatus::Refunded;
        Ok(owed)
    }

    pub fn dispute(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = EscrowStatus::Disputed;
        Ok(())
    }

    pub fn fund_milestone(&mut self, milestone_id: Uuid) -> Result<()> {
        self.ensure_active()?;
        let milestone = self.milestone_mut(milestone_id)?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(LedgerError::invalid_state(
                "milestone",
                milestone_id,
                format!("cannot fund a {:?} milestone", milestone.status),
            ));
        }
        milestone.status = MilestoneStatus::Funded;
        Ok(())
    }

    pub fn approve_milestone(&mut self, milestone_id: Uuid, party: Party) -> Result<()> {
        self.ensure_active()?;
        let milestone = self.milestone_mut(milestone_id)?;
        if !matches!(
            milestone.status,
            MilestoneStatus::Pending | MilestoneStatus::Funded
        ) {
            return Err(LedgerError::invalid_state(
                "milestone",
                milestone_id,
                format!("cannot approve a {:?} milestone", milestone.status),
            ));
        }
        match party {
            Party::Buyer => milestone.approved_by_buyer = true,
            Party::Seller => milestone.approved_by_seller = true,
        }
        Ok(())
    }

    pub fn dispute_milestone(&mut self, milestone_id: Uuid) -> Result<()> {
        self.ensure_active()?;
        let milestone = self.milestone_mut(milestone_id)?;
        if !matches!(
            milestone.status,
            MilestoneStatus::Pending | MilestoneStatus::Funded
        ) {
            return Err(LedgerError::invalid_state(
                "milestone",
                milestone_id,
                format!("cannot dispute a {:?} milestone", milestone.status),
            ));
        }
        milestone.status = MilestoneStatus::Disputed;
        Ok(())
    }

    /// Releases one funded, two-party-approved milestone. The account itself
    /// becomes `Released` with its last milestone.
    pub fn release_milestone(&mut self, milestone_id: Uuid, now: DateTime<Utc>) -> Result<MilestoneRelease> {
        self.ensure_active()?;
        let milestone = self.milestone_mut(milestone_id)?;
        if !milestone.is_releasable() {
            return Err(LedgerError::invalid_state(
                "milestone",
                milestone_id,
                format!(
                    "milestone is {:?} (buyer approved: {}, seller approved: {})",
                    milestone.status, milestone.approved_by_buyer, milestone.approved_by_seller
                ),
            ));
        }
        milestone.status = MilestoneStatus::Released;
        let amount = milestone.amount;

        let mut unallocated = None;
        if self
            .milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Released)
        {
            unallocated = Amount::try_from(self.remaining()).ok();
            self.status = EscrowStatus::Released;
            self.release_date = Some(now);
        }
        Ok(MilestoneRelease { amount, unallocated })
    }
}
