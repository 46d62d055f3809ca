// Diesel table definitions, kept in sync with repository::migrations.

diesel::table! {
    jobs (id) {
        id -> BigInt,
        name -> Text,
        job_type -> Text,
        arguments -> Nullable<Text>,
        state -> Text,
        interval_ms -> BigInt,
        next_run -> Nullable<Text>,
        last_run -> Nullable<Text>,
        running_since -> Nullable<Text>,
        delete_after_run -> Integer,
        run_after -> Nullable<BigInt>,
    }
}

diesel::table! {
    media (id) {
        id -> BigInt,
        title -> Text,
        medium -> Text,
        author -> Nullable<Text>,
        artist -> Nullable<Text>,
        lang_of_origin -> Nullable<Text>,
        country_of_origin -> Nullable<Text>,
        finished -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    medium_synonyms (medium_id, synonym) {
        medium_id -> BigInt,
        synonym -> Text,
    }
}

diesel::table! {
    medium_tocs (id) {
        id -> BigInt,
        medium_id -> BigInt,
        link -> Text,
    }
}

diesel::table! {
    parts (id) {
        id -> BigInt,
        medium_id -> BigInt,
        title -> Text,
        total_index -> BigInt,
        partial_index -> Nullable<BigInt>,
        combi_index -> Double,
    }
}

diesel::table! {
    episodes (id) {
        id -> BigInt,
        part_id -> BigInt,
        total_index -> BigInt,
        partial_index -> Nullable<BigInt>,
        combi_index -> Double,
    }
}

diesel::table! {
    episode_releases (episode_id, url) {
        episode_id -> BigInt,
        url -> Text,
        title -> Text,
        release_date -> Text,
        locked -> Integer,
        source_type -> Nullable<Text>,
    }
}

diesel::table! {
    user_episodes (user_id, episode_id) {
        user_id -> Text,
        episode_id -> BigInt,
        progress -> Double,
        read_date -> Nullable<Text>,
    }
}

diesel::table! {
    result_episodes (search_key, episode_id) {
        search_key -> Text,
        episode_id -> BigInt,
    }
}

diesel::table! {
    news (id) {
        id -> BigInt,
        title -> Text,
        link -> Text,
        date -> Text,
        medium_id -> Nullable<BigInt>,
        locked -> Integer,
    }
}

diesel::joinable!(medium_synonyms -> media (medium_id));
diesel::joinable!(medium_tocs -> media (medium_id));
diesel::joinable!(parts -> media (medium_id));
diesel::joinable!(episodes -> parts (part_id));
diesel::joinable!(episode_releases -> episodes (episode_id));
diesel::joinable!(user_episodes -> episodes (episode_id));
diesel::joinable!(result_episodes -> episodes (episode_id));

diesel::allow_tables_to_appear_in_same_query!(
    jobs,
    media,
    medium_synonyms,
    medium_tocs,
    parts,
    episodes,
    episode_releases,
    user_episodes,
    result_episodes,
    news,
);
