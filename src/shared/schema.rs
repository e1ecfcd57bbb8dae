diesel::table! {
    customers (id) {
        id -> Uuid,
        display_name -> Varchar,
        primary_email -> Varchar,
        alt_emails -> Array<Text>,
        phone -> Nullable<Varchar>,
        tags -> Array<Text>,
        ticket_count -> Int4,
        possible_duplicate_of -> Nullable<Uuid>,
        order_count -> Int4,
        lifetime_value -> Float8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Varchar,
        customer_id -> Uuid,
        status -> Varchar,
        priority -> Varchar,
        channel -> Varchar,
        tags -> Array<Text>,
        summary -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_messages (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        seq -> Int8,
        author -> Varchar,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_notes (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        author_name -> Nullable<Varchar>,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> customers (customer_id));
diesel::joinable!(ticket_messages -> tickets (ticket_id));
diesel::joinable!(ticket_notes -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(customers, tickets, ticket_messages, ticket_notes,);
