//! Property-based test generators using proptest.
//!
//! Provides strategies for settings, save options and random sequences
//! of tracking operations over a fixed pool of sample entities.

use crate::fixtures::{Customer, Order};
use odata_client::SaveChangesOptions;
use odata_protocol::{ODataFormat, ProtocolVersion};
use odata_tracking::{EntityRef, EntryMetadata, EntityTracker, MergeOption};
use proptest::prelude::*;

/// Strategy for protocol versions.
pub fn protocol_version_strategy() -> impl Strategy<Value = ProtocolVersion> {
    prop_oneof![
        Just(ProtocolVersion::V1),
        Just(ProtocolVersion::V2),
        Just(ProtocolVersion::V3),
    ]
}

/// Strategy for payload formats.
pub fn format_strategy() -> impl Strategy<Value = ODataFormat> {
    prop_oneof![Just(ODataFormat::Atom), Just(ODataFormat::Json)]
}

/// Strategy for merge options.
pub fn merge_option_strategy() -> impl Strategy<Value = MergeOption> {
    prop_oneof![
        Just(MergeOption::AppendOnly),
        Just(MergeOption::OverwriteChanges),
        Just(MergeOption::PreserveChanges),
        Just(MergeOption::NoTracking),
    ]
}

/// Strategy for any combination of the defined save option flags.
pub fn save_options_strategy() -> impl Strategy<Value = SaveChangesOptions> {
    prop::collection::vec(
        prop_oneof![
            Just(SaveChangesOptions::BATCH),
            Just(SaveChangesOptions::CONTINUE_ON_ERROR),
            Just(SaveChangesOptions::REPLACE_ON_UPDATE),
            Just(SaveChangesOptions::PATCH_ON_UPDATE),
            Just(SaveChangesOptions::BATCH_WITH_INDEPENDENT_OPERATIONS),
        ],
        0..4,
    )
    .prop_map(|flags| {
        flags
            .into_iter()
            .fold(SaveChangesOptions::NONE, |acc, flag| acc | flag)
    })
}

/// Strategy for customer names.
pub fn customer_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,11}").expect("Invalid regex")
}

/// One tracking operation over an [`EntityPool`].
///
/// Indices are taken modulo the pool size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingOp {
    /// Add customer `i` for insertion.
    AddCustomer(usize),
    /// Attach customer `i` as an existing server entity.
    AttachCustomer(usize),
    /// Add order `i` through the `Orders` property of customer `c`.
    AddRelatedOrder(usize, usize),
    /// Attach order `i`.
    AttachOrder(usize),
    /// Mark customer `i` modified.
    Update(usize),
    /// Delete customer `i`.
    Delete(usize),
    /// Stop tracking customer `i`.
    Detach(usize),
    /// Link customer `c` to order `o` through `Orders`.
    AddLink(usize, usize),
    /// Delete the `Orders` link from customer `c` to order `o`.
    DeleteLink(usize, usize),
    /// Set or clear the `BestFriend` reference of customer `c`.
    SetBestFriend(usize, Option<usize>),
}

/// Strategy for a single tracking operation over a pool of `size`.
pub fn tracking_op_strategy(size: usize) -> impl Strategy<Value = TrackingOp> {
    let i = 0..size;
    prop_oneof![
        i.clone().prop_map(TrackingOp::AddCustomer),
        i.clone().prop_map(TrackingOp::AttachCustomer),
        (i.clone(), i.clone()).prop_map(|(o, c)| TrackingOp::AddRelatedOrder(o, c)),
        i.clone().prop_map(TrackingOp::AttachOrder),
        i.clone().prop_map(TrackingOp::Update),
        i.clone().prop_map(TrackingOp::Delete),
        i.clone().prop_map(TrackingOp::Detach),
        (i.clone(), i.clone()).prop_map(|(c, o)| TrackingOp::AddLink(c, o)),
        (i.clone(), i.clone()).prop_map(|(c, o)| TrackingOp::DeleteLink(c, o)),
        (i.clone(), prop::option::of(i)).prop_map(|(c, f)| TrackingOp::SetBestFriend(c, f)),
    ]
}

/// Strategy for a sequence of up to `max_len` tracking operations.
pub fn tracking_ops_strategy(size: usize, max_len: usize) -> impl Strategy<Value = Vec<TrackingOp>> {
    prop::collection::vec(tracking_op_strategy(size), 0..max_len)
}

/// A fixed set of customers and orders that operations refer to by index.
pub struct EntityPool {
    /// Customer handles.
    pub customers: Vec<EntityRef>,
    /// Order handles.
    pub orders: Vec<EntityRef>,
}

impl EntityPool {
    /// Creates `size` customers and `size` orders.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            customers: (0..size)
                .map(|i| EntityRef::new(Customer::new(i as u32, &format!("c{i}"))))
                .collect(),
            orders: (0..size)
                .map(|i| EntityRef::new(Order::new(i as u32, 100)))
                .collect(),
        }
    }

    fn customer(&self, i: usize) -> &EntityRef {
        &self.customers[i % self.customers.len()]
    }

    fn order(&self, i: usize) -> &EntityRef {
        &self.orders[i % self.orders.len()]
    }

    /// Applies `op` to `tracker`. Returns whether the tracker accepted it.
    pub fn apply(&self, tracker: &mut EntityTracker, op: &TrackingOp) -> bool {
        let attached = |set: &str, i: usize| {
            EntryMetadata::with_identity(format!("http://host/svc/{set}({i})"))
                .edit_link(format!("{set}({i})"))
        };
        match op {
            TrackingOp::AddCustomer(i) => tracker.add_object("Customers", self.customer(*i).clone()).is_ok(),
            TrackingOp::AttachCustomer(i) => tracker
                .attach_to("Customers", self.customer(*i).clone(), &attached("Customers", *i))
                .is_ok(),
            TrackingOp::AddRelatedOrder(o, c) => tracker
                .add_related_object(self.customer(*c), "Orders", self.order(*o).clone())
                .is_ok(),
            TrackingOp::AttachOrder(i) => tracker
                .attach_to("Orders", self.order(*i).clone(), &attached("Orders", *i))
                .is_ok(),
            TrackingOp::Update(i) => tracker.update_object(self.customer(*i)).is_ok(),
            TrackingOp::Delete(i) => tracker.delete_object(self.customer(*i)).is_ok(),
            TrackingOp::Detach(i) => matches!(tracker.detach_entity(self.customer(*i)), Ok(true)),
            TrackingOp::AddLink(c, o) => tracker
                .add_link(self.customer(*c), "Orders", self.order(*o))
                .is_ok(),
            TrackingOp::DeleteLink(c, o) => tracker
                .delete_link(self.customer(*c), "Orders", self.order(*o))
                .is_ok(),
            TrackingOp::SetBestFriend(c, f) => tracker
                .set_link(self.customer(*c), "BestFriend", f.map(|f| self.customer(f)))
                .is_ok(),
        }
    }
}
