// @generated-by-hand to match migrations/diesel/2026010100000_core_tables.

diesel::table! {
    use diesel::sql_types::*;

    oauth_clients (client_id) {
        #[max_length = 255]
        client_id -> Varchar,
        #[max_length = 255]
        client_secret_hash -> Varchar,
        tenant_id -> Uuid,
        redirect_uris -> Jsonb,
        allowed_scopes -> Jsonb,
        is_confidential -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    audit_events (id) {
        id -> Uuid,
        #[max_length = 64]
        kind -> Varchar,
        #[max_length = 255]
        shard_key -> Varchar,
        tenant_id -> Nullable<Uuid>,
        occurred_at -> Timestamptz,
        detail -> Jsonb,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    refresh_family_snapshots (user_id, client_id) {
        user_id -> Uuid,
        #[max_length = 255]
        client_id -> Varchar,
        version -> Int8,
        #[max_length = 255]
        last_jti -> Varchar,
        last_used_at -> Timestamptz,
        expires_at -> Timestamptz,
        allowed_scope -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    session_snapshots (id) {
        #[max_length = 255]
        id -> Varchar,
        user_id -> Uuid,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        data -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    oauth_clients,
    audit_events,
    refresh_family_snapshots,
    session_snapshots,
);
