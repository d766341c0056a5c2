//! Static registry of Shopify streams
//!
//! [`all_streams`] lists every stream this tap knows about. The active set
//! for a run is derived from configuration by [`active_streams`].

use super::definition::{PaginationStrategy, StreamDefinition, StreamGate};
use super::schema::{Field, FieldType, Schema};
use crate::config::TapConfig;
use crate::error::{Result, TapError};

use FieldType::{Array, Boolean, DateTime, Integer, Number, Object, String as Text};

fn id() -> Field {
    Field::new("id", Integer).required()
}

fn updated_at() -> Field {
    Field::new("updated_at", DateTime).required()
}

fn collects() -> StreamDefinition {
    StreamDefinition::new(
        "collects",
        "collects.json",
        Schema::new(vec![
            id(),
            Field::new("collection_id", Integer),
            Field::new("product_id", Integer),
            Field::new("position", Integer),
            Field::new("sort_value", Text),
            Field::new("created_at", DateTime),
            updated_at(),
        ]),
    )
    // No upstream filter; the bookmark is applied client-side
    .incremental("updated_at", None)
}

fn custom_collections() -> StreamDefinition {
    StreamDefinition::new(
        "custom_collections",
        "custom_collections.json",
        Schema::new(vec![
            id(),
            Field::new("handle", Text),
            Field::new("title", Text),
            Field::new("body_html", Text),
            Field::new("published_at", DateTime),
            Field::new("published_scope", Text),
            Field::new("sort_order", Text),
            Field::new("template_suffix", Text),
            Field::new("image_src", Text).from_path("image.src"),
            updated_at(),
        ]),
    )
    .incremental("updated_at", Some("updated_at_min"))
}

fn inventory_items() -> StreamDefinition {
    StreamDefinition::new(
        "inventory_items",
        "inventory_items.json",
        Schema::new(vec![
            id(),
            Field::new("sku", Text),
            Field::new("cost", Number),
            Field::new("country_code_of_origin", Text),
            Field::new("province_code_of_origin", Text),
            Field::new("harmonized_system_code", Text),
            Field::new("tracked", Boolean),
            Field::new("requires_shipping", Boolean),
            Field::new("created_at", DateTime),
            updated_at(),
        ]),
    )
    .incremental("updated_at", None)
    .optional()
}

fn inventory_levels() -> StreamDefinition {
    StreamDefinition::new(
        "inventory_levels",
        "inventory_levels.json",
        Schema::new(vec![
            Field::new("inventory_item_id", Integer).required(),
            Field::new("location_id", Integer).required(),
            Field::new("available", Integer),
            Field::new("admin_graphql_api_id", Text),
            updated_at(),
        ]),
    )
    .with_primary_key(&["inventory_item_id", "location_id"])
    .incremental("updated_at", Some("updated_at_min"))
}

fn locations() -> StreamDefinition {
    StreamDefinition::new(
        "locations",
        "locations.json",
        Schema::new(vec![
            id(),
            Field::new("name", Text),
            Field::new("address1", Text),
            Field::new("address2", Text),
            Field::new("city", Text),
            Field::new("zip", Text),
            Field::new("province", Text),
            Field::new("country", Text),
            Field::new("country_code", Text),
            Field::new("phone", Text),
            Field::new("legacy", Boolean),
            Field::new("active", Boolean),
            Field::new("created_at", DateTime),
            Field::new("updated_at", DateTime),
        ]),
    )
    .with_pagination(PaginationStrategy::Single)
}

fn metafields() -> StreamDefinition {
    StreamDefinition::new(
        "metafields",
        "metafields.json",
        Schema::new(vec![
            id(),
            Field::new("namespace", Text),
            Field::new("key", Text),
            Field::new("value", Text),
            Field::new("type", Text),
            Field::new("description", Text),
            Field::new("owner_id", Integer),
            Field::new("owner_resource", Text),
            Field::new("created_at", DateTime),
            updated_at(),
        ]),
    )
    .incremental("updated_at", Some("updated_at_min"))
}

fn products() -> StreamDefinition {
    StreamDefinition::new(
        "products",
        "products.json",
        Schema::new(vec![
            id(),
            Field::new("title", Text),
            Field::new("body_html", Text),
            Field::new("vendor", Text),
            Field::new("product_type", Text),
            Field::new("handle", Text),
            Field::new("status", Text),
            Field::new("tags", Text),
            Field::new("published_scope", Text),
            Field::new("template_suffix", Text),
            Field::new("variants", Array),
            Field::new("options", Array),
            Field::new("images", Array),
            Field::new("image", Object),
            Field::new("created_at", DateTime),
            Field::new("published_at", DateTime),
            updated_at(),
        ]),
    )
    .incremental("updated_at", Some("updated_at_min"))
    .with_param("order", "updated_at asc")
    .sorted()
}

fn users() -> StreamDefinition {
    StreamDefinition::new(
        "users",
        "users.json",
        Schema::new(vec![
            id(),
            Field::new("first_name", Text),
            Field::new("last_name", Text),
            Field::new("email", Text),
            Field::new("phone", Text),
            Field::new("locale", Text),
            Field::new("user_type", Text),
            Field::new("account_owner", Boolean),
            Field::new("receive_announcements", Integer),
            Field::new("tfa_enabled", Boolean),
            Field::new("permissions", Array),
        ]),
    )
    .optional()
    .gated(StreamGate::PlusAccount)
}

fn abandoned_checkouts() -> StreamDefinition {
    StreamDefinition::new(
        "abandoned_checkouts",
        "checkouts.json",
        Schema::new(vec![
            id(),
            Field::new("token", Text),
            Field::new("email", Text),
            Field::new("currency", Text),
            Field::new("total_price", Number),
            Field::new("subtotal_price", Number),
            Field::new("line_items", Array),
            Field::new("customer_id", Integer).from_path("customer.id"),
            Field::new("created_at", DateTime),
            Field::new("completed_at", DateTime),
            updated_at(),
        ]),
    )
    .with_records_key("checkouts")
    .incremental("updated_at", Some("updated_at_min"))
    .gated(StreamGate::ProtectedData)
}

fn customers() -> StreamDefinition {
    StreamDefinition::new(
        "customers",
        "customers.json",
        Schema::new(vec![
            id(),
            Field::new("email", Text),
            Field::new("first_name", Text),
            Field::new("last_name", Text),
            Field::new("state", Text),
            Field::new("verified_email", Boolean),
            Field::new("orders_count", Integer),
            Field::new("total_spent", Number),
            Field::new("tags", Text),
            Field::new("currency", Text),
            Field::new("default_address_country", Text).from_path("default_address.country"),
            Field::new("created_at", DateTime),
            updated_at(),
        ]),
    )
    .incremental("updated_at", Some("updated_at_min"))
    .gated(StreamGate::ProtectedData)
}

fn orders() -> StreamDefinition {
    StreamDefinition::new(
        "orders",
        "orders.json",
        Schema::new(vec![
            id(),
            Field::new("name", Text),
            Field::new("order_number", Integer),
            Field::new("email", Text),
            Field::new("currency", Text),
            Field::new("financial_status", Text),
            Field::new("fulfillment_status", Text),
            Field::new("total_price", Number),
            Field::new("subtotal_price", Number),
            Field::new("total_tax", Number),
            Field::new("test", Boolean),
            Field::new("line_items", Array),
            Field::new("customer_id", Integer).from_path("customer.id"),
            Field::new("created_at", DateTime),
            Field::new("cancelled_at", DateTime),
            Field::new("closed_at", DateTime),
            updated_at(),
        ]),
    )
    .incremental("updated_at", Some("updated_at_min"))
    .with_param("status", "any")
    .with_param("order", "updated_at asc")
    .sorted()
    .gated(StreamGate::ProtectedData)
}

/// Every stream known to the tap, in declaration order.
pub fn all_streams() -> Vec<StreamDefinition> {
    vec![
        abandoned_checkouts(),
        collects(),
        custom_collections(),
        customers(),
        inventory_items(),
        inventory_levels(),
        locations(),
        metafields(),
        orders(),
        products(),
        users(),
    ]
}

/// Build the active stream set for a run.
///
/// Gated streams are enabled by their config flag, then the optional
/// `streams` selection narrows the set. Naming a stream that does not exist,
/// or one whose gate is closed, is a config error.
pub fn active_streams(config: &TapConfig) -> Result<Vec<StreamDefinition>> {
    let enabled = |def: &StreamDefinition| match def.gate {
        StreamGate::Always => true,
        StreamGate::PlusAccount => config.is_plus_account,
        StreamGate::ProtectedData => config.protected_data,
    };

    let all = all_streams();

    let Some(selection) = &config.streams else {
        return Ok(all.into_iter().filter(|d| enabled(d)).collect());
    };

    for name in selection {
        match all.iter().find(|d| &d.name == name) {
            None => {
                return Err(TapError::Config(format!(
                    "unknown stream '{}'. Available streams: {}",
                    name,
                    all.iter()
                        .map(|d| d.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            Some(def) if !enabled(def) => {
                return Err(TapError::Config(format!(
                    "stream '{}' requires {}",
                    name,
                    match def.gate {
                        StreamGate::PlusAccount => "is_plus_account",
                        _ => "protected_data",
                    }
                )));
            }
            Some(_) => {}
        }
    }

    Ok(all
        .into_iter()
        .filter(|d| enabled(d) && selection.contains(&d.name))
        .collect())
}
