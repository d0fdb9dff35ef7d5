table! {
    users (user_id) {
        user_id -> Uuid,
        name -> Text,
        email -> Text,
        password_hash -> Text,
    }
}

table! {
    subscriptions (id) {
        id -> Uuid,
        user_id -> Uuid,
        name -> Text,
        price -> Float8,
        currency -> Text,
        frequency -> Text,
        category -> Text,
        payment_method -> Text,
        status -> Text,
        start_date -> Timestamptz,
        renewal_date -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    reminder_workflows (subscription_id) {
        subscription_id -> Uuid,
        snapshot -> Text,
        next_step -> Int4,
        state -> Text,
        wake_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        claim_token -> Nullable<Uuid>,
        claimed_at -> Nullable<Timestamptz>,
    }
}

joinable!(subscriptions -> users (user_id));

allow_tables_to_appear_in_same_query!(subscriptions, users);
