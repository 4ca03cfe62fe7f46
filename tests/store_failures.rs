use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use uuid::Uuid;

use grocery_dispatch::auth::Actor;
use grocery_dispatch::config::Config;
use grocery_dispatch::error::AppError;
use grocery_dispatch::models::assignment::{Assignment, AssignmentStatus};
use grocery_dispatch::models::order::{
    DeliveryAddress, LineItem, Order, OrderStatus, PaymentMethod,
};
use grocery_dispatch::models::user::{GeoPoint, NearbyDriver, Role, User};
use grocery_dispatch::state::AppState;
use grocery_dispatch::store::{Store, StoreCounts};

mock! {
    pub FlakyStore {}

    #[async_trait]
    impl Store for FlakyStore {
        async fn insert_user(&self, user: User) -> Result<User, AppError>;
        async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
        async fn update_user_profile(&self, id: Uuid, role: Role, mobile: String) -> Result<User, AppError>;
        async fn update_driver_location(&self, driver_id: Uuid, location: GeoPoint) -> Result<(), AppError>;
        async fn drivers_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<NearbyDriver>, AppError>;
        async fn insert_order(&self, order: Order) -> Result<Order, AppError>;
        async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;
        async fn list_orders(&self, customer_id: Option<Uuid>) -> Result<Vec<Order>, AppError>;
        async fn transition_order_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> Result<Order, AppError>;
        async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, AppError>;
        async fn busy_drivers(&self, driver_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError>;
        async fn commit_dispatch(&self, assignment: Assignment) -> Result<Order, AppError>;
        async fn accept_assignment(&self, assignment_id: Uuid, driver_id: Uuid) -> Result<(Assignment, Order), AppError>;
        async fn complete_assignment(&self, assignment_id: Uuid, driver_id: Uuid) -> Result<(Assignment, Order), AppError>;
        async fn expire_assignment(&self, assignment_id: Uuid) -> Result<(Assignment, Order), AppError>;
        async fn stale_broadcasts(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;
        async fn counts(&self) -> Result<StoreCounts, AppError>;
        async fn shutdown(&self);
    }
}

const ADMIN: Actor = Actor {
    id: Uuid::nil(),
    role: Role::Admin,
};

fn pending_order() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        items: vec![LineItem {
            product_id: Uuid::new_v4(),
            name: "Rice".to_string(),
            unit_price: 4.0,
            unit: "5 kg".to_string(),
            quantity: 1,
        }],
        total_amount: 4.0,
        payment_method: PaymentMethod::CashOnDelivery,
        is_paid: false,
        address: DeliveryAddress {
            full_name: "Test Customer".to_string(),
            mobile: "5550100".to_string(),
            full_address: "1 Test Street".to_string(),
            city: "Pune".to_string(),
            state: "MH".to_string(),
            pincode: "411001".to_string(),
            location: GeoPoint {
                lat: 18.5204,
                lng: 73.8567,
            },
        },
        status: OrderStatus::Pending,
        assignment: None,
        assigned_driver: None,
        created_at: now,
        updated_at: now,
    }
}

fn nearby_driver() -> NearbyDriver {
    let location = GeoPoint {
        lat: 18.5214,
        lng: 73.8567,
    };
    let now = Utc::now();
    NearbyDriver {
        driver: User {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            email: "ravi@example.com".to_string(),
            mobile: Some("5550111".to_string()),
            role: Role::Driver,
            location: Some(location),
            created_at: now,
            updated_at: now,
        },
        location,
        distance_km: 0.11,
    }
}

/// Store that serves the order and advances it, leaving dispatch-related
/// calls for each test to configure.
fn store_advancing(order: &Order) -> MockFlakyStore {
    let mut store = MockFlakyStore::new();

    let stored = order.clone();
    store
        .expect_get_order()
        .returning(move |_| Ok(Some(stored.clone())));

    let advanced = Order {
        status: OrderStatus::OutForDelivery,
        ..order.clone()
    };
    store
        .expect_transition_order_status()
        .times(1)
        .returning(move |_, _, _| Ok(advanced.clone()));

    store
}

fn app_state(store: MockFlakyStore) -> AppState {
    let (state, _location_rx) = AppState::new(Config::default(), Arc::new(store));
    state
}

#[tokio::test]
async fn failed_commit_sends_no_offers() {
    let order = pending_order();
    let driver = nearby_driver();
    let driver_id = driver.driver.id;

    let mut store = store_advancing(&order);
    store
        .expect_drivers_within()
        .times(1)
        .returning(move |_, _| Ok(vec![driver.clone()]));
    store
        .expect_busy_drivers()
        .times(1)
        .returning(|_| Ok(HashSet::new()));
    store
        .expect_commit_dispatch()
        .times(1)
        .returning(|_| Err(AppError::Unavailable));

    let state = app_state(store);
    let (connection, mut driver_rx) = state.hub.register();
    state.presence.register_connection(driver_id, connection);
    let mut topic = state.hub.subscribe();

    let outcome = state
        .lifecycle
        .transition_status(order.id, OrderStatus::OutForDelivery, &ADMIN)
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::OutForDelivery);
    assert!(outcome.order.assignment.is_none());
    assert!(outcome.assignment.is_none());
    assert!(outcome.notified.is_empty());
    assert!(driver_rx.try_recv().is_err());

    // The committed status change is still announced.
    let frame = topic.try_recv().unwrap();
    assert_eq!(frame.role, Role::Admin);
    assert!(frame.text.contains("order-status-changed"));

    let metrics = state.metrics.encode().unwrap();
    assert!(metrics.contains("dispatch_total{outcome=\"error\"} 1"));
}

#[tokio::test]
async fn busy_lookup_failure_leaves_order_unassigned() {
    let order = pending_order();
    let driver = nearby_driver();

    let mut store = store_advancing(&order);
    store
        .expect_drivers_within()
        .returning(move |_, _| Ok(vec![driver.clone()]));
    store
        .expect_busy_drivers()
        .returning(|_| Err(AppError::Internal("index unavailable".to_string())));
    store.expect_commit_dispatch().never();

    let state = app_state(store);
    let outcome = state
        .lifecycle
        .transition_status(order.id, OrderStatus::OutForDelivery, &ADMIN)
        .await
        .unwrap();

    assert!(outcome.assignment.is_none());
    assert!(outcome.available_drivers.is_empty());
}

#[tokio::test]
async fn status_that_keeps_changing_gives_up_with_conflict() {
    let order = pending_order();

    let mut store = MockFlakyStore::new();
    let stored = order.clone();
    store
        .expect_get_order()
        .returning(move |_| Ok(Some(stored.clone())));
    store
        .expect_transition_order_status()
        .returning(|id, _, _| Err(AppError::Conflict(format!("order {id} changed concurrently"))));
    store.expect_drivers_within().never();
    store.expect_commit_dispatch().never();

    let state = app_state(store);
    let mut topic = state.hub.subscribe();

    let err = state
        .lifecycle
        .transition_status(order.id, OrderStatus::OutForDelivery, &ADMIN)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(topic.try_recv().is_err());
}

#[tokio::test]
async fn unavailable_store_rejects_order_placement() {
    let mut store = MockFlakyStore::new();
    store
        .expect_insert_order()
        .returning(|_| Err(AppError::Unavailable));

    let state = app_state(store);
    let customer = Actor {
        id: Uuid::new_v4(),
        role: Role::Customer,
    };
    let draft = pending_order();

    let err = state
        .lifecycle
        .create_order(
            &customer,
            grocery_dispatch::engine::lifecycle::NewOrder {
                items: draft.items,
                total_amount: draft.total_amount,
                payment_method: draft.payment_method,
                address: draft.address,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unavailable));
}

#[tokio::test]
async fn broadcast_committed_before_delivery_is_settled_on_retry() {
    let mut order = pending_order();
    order.status = OrderStatus::OutForDelivery;
    let assignment = Assignment::broadcast(order.id, vec![Uuid::new_v4()]);

    let before = order.clone();
    let linked = Order {
        assignment: Some(assignment.id),
        ..order.clone()
    };
    let delivered = Order {
        status: OrderStatus::Delivered,
        ..order.clone()
    };

    let mut store = MockFlakyStore::new();
    let reads = AtomicUsize::new(0);
    store.expect_get_order().returning(move |_| {
        // The broadcast lands between the first read and the status write.
        if reads.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Some(before.clone()))
        } else {
            Ok(Some(linked.clone()))
        }
    });
    let writes = AtomicUsize::new(0);
    store
        .expect_transition_order_status()
        .times(2)
        .returning(move |id, _, _| {
            if writes.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::Conflict(format!("order {id} still has a live assignment")))
            } else {
                Ok(delivered.clone())
            }
        });
    let open = assignment.clone();
    store
        .expect_get_assignment()
        .returning(move |_| Ok(Some(open.clone())));
    let expired = Assignment {
        status: AssignmentStatus::Expired,
        ..assignment.clone()
    };
    let detached = order.clone();
    store
        .expect_expire_assignment()
        .times(1)
        .returning(move |_| Ok((expired.clone(), detached.clone())));

    let state = app_state(store);
    let outcome = state
        .lifecycle
        .transition_status(order.id, OrderStatus::Delivered, &ADMIN)
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn losing_the_status_race_returns_the_current_state() {
    let order = pending_order();
    let assignment = Assignment::broadcast(order.id, vec![Uuid::new_v4()]);

    let before = order.clone();
    let after = Order {
        status: OrderStatus::OutForDelivery,
        assignment: Some(assignment.id),
        ..order.clone()
    };

    let mut store = MockFlakyStore::new();
    let reads = AtomicUsize::new(0);
    store.expect_get_order().returning(move |_| {
        if reads.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Some(before.clone()))
        } else {
            Ok(Some(after.clone()))
        }
    });
    store
        .expect_transition_order_status()
        .times(1)
        .returning(|id, _, _| Err(AppError::Conflict(format!("order {id} changed concurrently"))));
    let linked = assignment.clone();
    store
        .expect_get_assignment()
        .returning(move |_| Ok(Some(linked.clone())));
    store.expect_commit_dispatch().never();

    let state = app_state(store);
    let mut topic = state.hub.subscribe();
    let outcome = state
        .lifecycle
        .transition_status(order.id, OrderStatus::OutForDelivery, &ADMIN)
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::OutForDelivery);
    assert_eq!(outcome.assignment.map(|a| a.id), Some(assignment.id));
    // The winning request announces the change, not this one.
    assert!(topic.try_recv().is_err());
}
