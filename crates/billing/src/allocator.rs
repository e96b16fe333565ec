//! Invoice sequence allocation
//!
//! Hands out consecutive invoice sequences per tenant and issue month. A
//! single allocator-wide lock serializes the lookup-and-compute step; it is
//! released before any invoice is written. The allocator also remembers the
//! highest sequence it has handed out, so two runs in the same process never
//! receive overlapping ranges even before either has persisted anything.
//! Across processes the `(tenant_id, invoice_number)` unique constraint is the
//! final guard.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tirta_shared::UsagePeriod;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::numbering::{invoice_number_prefix, InvoiceNumber};
use crate::store::BillingStore;

pub struct InvoiceNumberAllocator {
    store: Arc<dyn BillingStore>,
    /// Highest sequence handed out per (tenant, issue month)
    issued: Mutex<HashMap<(Uuid, UsagePeriod), u32>>,
}

impl InvoiceNumberAllocator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            store,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve `count` consecutive invoice numbers
    pub async fn allocate(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        count: usize,
    ) -> BillingResult<Vec<InvoiceNumber>> {
        self.take(tenant_id, period, count, true).await
    }

    /// Reserve a single invoice number
    pub async fn allocate_one(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
    ) -> BillingResult<InvoiceNumber> {
        self.allocate(tenant_id, period, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::Numbering("empty allocation".to_string()))
    }

    /// Compute the numbers the next allocation would return without reserving them
    pub async fn preview(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        count: usize,
    ) -> BillingResult<Vec<InvoiceNumber>> {
        self.take(tenant_id, period, count, false).await
    }

    async fn take(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
        count: usize,
        reserve: bool,
    ) -> BillingResult<Vec<InvoiceNumber>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let count = u32::try_from(count)
            .map_err(|_| BillingError::Numbering(format!("batch too large: {}", count)))?;

        let mut issued = self.issued.lock().await;

        let persisted = self.last_persisted_sequence(tenant_id, period).await?;
        let reserved = issued.get(&(tenant_id, period)).copied().unwrap_or(0);
        let last = persisted.max(reserved);

        let start = last
            .checked_add(1)
            .ok_or_else(|| BillingError::Numbering("sequence exhausted".to_string()))?;
        let end = start
            .checked_add(count - 1)
            .ok_or_else(|| BillingError::Numbering("sequence exhausted".to_string()))?;

        if reserve {
            // Numbers are issued in the current month; earlier months are done
            issued.retain(|(_, issued_period), _| *issued_period >= period);
            issued.insert((tenant_id, period), end);
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            period = %period,
            start = start,
            end = end,
            reserve = reserve,
            "Allocated invoice sequence range"
        );

        Ok((start..=end)
            .map(|sequence| InvoiceNumber::new(period, sequence))
            .collect())
    }

    /// Sequence of the highest stored number for the month, 0 when none exist
    async fn last_persisted_sequence(
        &self,
        tenant_id: Uuid,
        period: UsagePeriod,
    ) -> BillingResult<u32> {
        let prefix = invoice_number_prefix(period);
        let last = self
            .store
            .highest_invoice_number(tenant_id, &prefix)
            .await
            .map_err(|e| BillingError::Numbering(e.to_string()))?;

        match last {
            None => Ok(0),
            Some(number) => {
                let parsed = InvoiceNumber::parse(&number)
                    .map_err(|e| BillingError::Numbering(e.to_string()))?;
                Ok(parsed.sequence())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryBillingStore;
    use crate::numbering::format_invoice_number;

    fn period(s: &str) -> UsagePeriod {
        s.parse().unwrap()
    }

    fn rendered(numbers: &[InvoiceNumber]) -> Vec<String> {
        numbers.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_first_allocation_starts_at_one() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = InvoiceNumberAllocator::new(store);

        let numbers = allocator
            .allocate(Uuid::new_v4(), period("2025-02"), 3)
            .await
            .unwrap();
        assert_eq!(
            rendered(&numbers),
            vec!["INV-202502-0001", "INV-202502-0002", "INV-202502-0003"]
        );
    }

    #[tokio::test]
    async fn test_continues_after_highest_persisted_number() {
        let store = Arc::new(InMemoryBillingStore::new());
        let tenant_id = Uuid::new_v4();
        store.seed_invoice_number(tenant_id, &format_invoice_number(period("2025-02"), 9));
        store.seed_invoice_number(tenant_id, &format_invoice_number(period("2025-02"), 41));
        // Other months and tenants do not count
        store.seed_invoice_number(tenant_id, &format_invoice_number(period("2025-01"), 500));
        store.seed_invoice_number(Uuid::new_v4(), &format_invoice_number(period("2025-02"), 900));

        let allocator = InvoiceNumberAllocator::new(store);
        let number = allocator
            .allocate_one(tenant_id, period("2025-02"))
            .await
            .unwrap();
        assert_eq!(number.to_string(), "INV-202502-0042");
    }

    #[tokio::test]
    async fn test_sequence_grows_past_four_digits() {
        let store = Arc::new(InMemoryBillingStore::new());
        let tenant_id = Uuid::new_v4();
        store.seed_invoice_number(tenant_id, "INV-202502-9999");

        let allocator = InvoiceNumberAllocator::new(store.clone());
        let number = allocator.allocate_one(tenant_id, period("2025-02")).await.unwrap();
        assert_eq!(number.to_string(), "INV-202502-10000");

        store.seed_invoice_number(tenant_id, "INV-202502-10000");
        let next = InvoiceNumberAllocator::new(store)
            .allocate_one(tenant_id, period("2025-02"))
            .await
            .unwrap();
        assert_eq!(next.to_string(), "INV-202502-10001");
    }

    #[tokio::test]
    async fn test_reserved_ranges_never_overlap() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = InvoiceNumberAllocator::new(store);
        let tenant_id = Uuid::new_v4();

        let first = allocator.allocate(tenant_id, period("2025-02"), 2).await.unwrap();
        let second = allocator.allocate(tenant_id, period("2025-02"), 2).await.unwrap();
        assert_eq!(first[1].sequence() + 1, second[0].sequence());
    }

    #[tokio::test]
    async fn test_older_months_are_forgotten() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = InvoiceNumberAllocator::new(store);
        let tenant_id = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();

        allocator.allocate(tenant_id, period("2025-01"), 3).await.unwrap();
        allocator.allocate(other_tenant, period("2025-01"), 2).await.unwrap();
        allocator.allocate(tenant_id, period("2025-02"), 1).await.unwrap();

        let issued = allocator.issued.lock().await;
        assert_eq!(issued.len(), 1);
        assert_eq!(issued.get(&(tenant_id, period("2025-02"))), Some(&1));
    }

    #[tokio::test]
    async fn test_preview_does_not_reserve() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = InvoiceNumberAllocator::new(store);
        let tenant_id = Uuid::new_v4();

        let preview = allocator.preview(tenant_id, period("2025-02"), 2).await.unwrap();
        let again = allocator.preview(tenant_id, period("2025-02"), 2).await.unwrap();
        assert_eq!(preview, again);

        let allocated = allocator.allocate(tenant_id, period("2025-02"), 2).await.unwrap();
        assert_eq!(preview, allocated);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_disjoint() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = Arc::new(InvoiceNumberAllocator::new(store));
        let tenant_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate(tenant_id, period("2025-02"), 5).await.unwrap()
            }));
        }

        let mut all: Vec<u32> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap().iter().map(|n| n.sequence()));
        }
        all.sort_unstable();
        assert_eq!(all, (1..=80).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_zero_count_is_empty() {
        let store = Arc::new(InMemoryBillingStore::new());
        let allocator = InvoiceNumberAllocator::new(store);
        assert!(allocator
            .allocate(Uuid::new_v4(), period("2025-02"), 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_numbering_error() {
        let store = Arc::new(InMemoryBillingStore::new());
        store.fail_number_lookups(true);
        let allocator = InvoiceNumberAllocator::new(store);

        let err = allocator
            .allocate(Uuid::new_v4(), period("2025-02"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Numbering(_)));
    }
}
