//! Descriptive statistics over ingested repository data. Everything here is
//! a pure function of the inputs; persistence and scheduling live elsewhere.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Timelike, Utc, Weekday};

use crate::models::{
    AnalyticsSnapshot, AuthorAnalytics, AuthorRank, AuthorStats, Branch, BranchAnalytics, Commit,
    CommitAnalytics, PullRequest, PullRequestAnalytics, Repository, RepositoryHealth,
    TimeAnalytics,
};

const TOP_CONTRIBUTORS: usize = 10;

pub fn analyze(
    repo: &Repository,
    commits: &[Commit],
    branches: &[Branch],
    pull_requests: &[PullRequest],
) -> AnalyticsSnapshot {
    AnalyticsSnapshot {
        repository_id: repo.id.clone(),
        analysis_date: Utc::now(),
        commit_analytics: analyze_commits(commits),
        author_analytics: analyze_authors(commits),
        branch_analytics: analyze_branches(branches),
        time_analytics: analyze_time_patterns(commits, pull_requests),
        pull_request_analytics: analyze_pull_requests(pull_requests),
        repository_health: analyze_repository_health(commits, branches, pull_requests),
        extra: serde_json::Value::Null,
    }
}

pub fn analyze_commits(commits: &[Commit]) -> CommitAnalytics {
    let total_commits = commits.len();
    let total_added: i64 = commits.iter().map(|c| c.change_counts.added).sum();
    let total_edited: i64 = commits.iter().map(|c| c.change_counts.edited).sum();
    let total_deleted: i64 = commits.iter().map(|c| c.change_counts.deleted).sum();

    let merge_commits = commits.iter().filter(|c| c.parents.len() > 1).count();
    let regular_commits = total_commits - merge_commits;
    let merge_ratio = ratio(merge_commits, total_commits);

    let average_message_length = if commits.is_empty() {
        0.0
    } else {
        commits.iter().map(|c| c.message.len()).sum::<usize>() as f64 / total_commits as f64
    };

    let mut commits_by_day_of_week = BTreeMap::new();
    let mut commits_by_hour = BTreeMap::new();
    let mut commits_by_month = BTreeMap::new();
    for commit in commits {
        *commits_by_day_of_week
            .entry(commit.author_date.format("%A").to_string())
            .or_insert(0) += 1;
        *commits_by_hour
            .entry(format!("{:02}", commit.author_date.hour()))
            .or_insert(0) += 1;
        *commits_by_month
            .entry(commit.author_date.format("%Y-%m").to_string())
            .or_insert(0) += 1;
    }

    CommitAnalytics {
        total_commits,
        total_added,
        total_edited,
        total_deleted,
        merge_commits,
        regular_commits,
        merge_ratio,
        average_message_length,
        commits_by_day_of_week,
        commits_by_hour,
        commits_by_month,
        first_commit_date: commits.iter().map(|c| c.author_date).min(),
        last_commit_date: commits.iter().map(|c| c.author_date).max(),
    }
}

pub fn analyze_authors(commits: &[Commit]) -> AuthorAnalytics {
    let mut stats: BTreeMap<String, AuthorStats> = BTreeMap::new();
    let mut emails: HashMap<String, HashSet<String>> = HashMap::new();

    for commit in commits {
        let entry = stats
            .entry(commit.author_name.clone())
            .or_insert_with(|| AuthorStats {
                commits: 0,
                added: 0,
                edited: 0,
                deleted: 0,
                total_changes: 0,
                first_commit: None,
                last_commit: None,
                email_count: 0,
            });
        entry.commits += 1;
        entry.added += commit.change_counts.added;
        entry.edited += commit.change_counts.edited;
        entry.deleted += commit.change_counts.deleted;
        entry.total_changes = entry.added + entry.edited + entry.deleted;
        entry.first_commit = match entry.first_commit {
            Some(first) if first <= commit.author_date => Some(first),
            _ => Some(commit.author_date),
        };
        entry.last_commit = match entry.last_commit {
            Some(last) if last >= commit.author_date => Some(last),
            _ => Some(commit.author_date),
        };
        emails
            .entry(commit.author_name.clone())
            .or_default()
            .insert(commit.author_email.clone());
    }

    for (author, stat) in stats.iter_mut() {
        stat.email_count = emails.get(author).map(HashSet::len).unwrap_or(0);
    }

    let mut by_commits: Vec<AuthorRank> = stats
        .iter()
        .map(|(name, stat)| AuthorRank {
            name: name.clone(),
            commits: stat.commits,
            total_changes: stat.total_changes,
        })
        .collect();
    by_commits.sort_by(|a, b| b.commits.cmp(&a.commits).then(a.name.cmp(&b.name)));
    let mut by_changes = by_commits.clone();
    by_changes.sort_by(|a, b| {
        b.total_changes
            .cmp(&a.total_changes)
            .then(a.name.cmp(&b.name))
    });

    let (bus_factor_50, bus_factor_80) = bus_factors(&by_commits, commits.len() as u64);

    AuthorAnalytics {
        total_authors: stats.len(),
        author_statistics: stats,
        top_contributors_by_commits: by_commits.into_iter().take(TOP_CONTRIBUTORS).collect(),
        top_contributors_by_changes: by_changes.into_iter().take(TOP_CONTRIBUTORS).collect(),
        bus_factor_50_percent: bus_factor_50,
        bus_factor_80_percent: bus_factor_80,
    }
}

/// How many of the top contributors it takes to cover 50% and 80% of all
/// commits. Input must be sorted by commit count descending.
fn bus_factors(ranked: &[AuthorRank], total_commits: u64) -> (usize, usize) {
    let mut cumulative = 0u64;
    let mut bus_50 = 0;
    let mut bus_80 = 0;

    for (index, rank) in ranked.iter().enumerate() {
        cumulative += rank.commits;
        if bus_50 == 0 && cumulative as f64 >= total_commits as f64 * 0.5 {
            bus_50 = index + 1;
        }
        if bus_80 == 0 && cumulative as f64 >= total_commits as f64 * 0.8 {
            bus_80 = index + 1;
            break;
        }
    }

    (bus_50, bus_80)
}

pub fn analyze_branches(branches: &[Branch]) -> BranchAnalytics {
    let mut branch_name_patterns = BTreeMap::new();
    for branch in branches {
        let key = match branch.name.split_once('/') {
            Some((prefix, _)) => prefix.to_string(),
            None => "no_prefix".to_string(),
        };
        *branch_name_patterns.entry(key).or_insert(0) += 1;
    }

    let matches_any = |name: &str, keywords: &[&str]| {
        let lower = name.to_lowercase();
        keywords.iter().any(|k| lower.contains(k))
    };

    BranchAnalytics {
        total_branches: branches.len(),
        branch_name_patterns,
        feature_branches: branches
            .iter()
            .filter(|b| matches_any(&b.name, &["feature", "feat"]))
            .count(),
        hotfix_branches: branches
            .iter()
            .filter(|b| matches_any(&b.name, &["hotfix", "fix", "bug"]))
            .count(),
        release_branches: branches
            .iter()
            .filter(|b| matches_any(&b.name, &["release", "rel"]))
            .count(),
    }
}

pub fn analyze_time_patterns(commits: &[Commit], pull_requests: &[PullRequest]) -> TimeAnalytics {
    let mut commits_by_week = BTreeMap::new();
    let mut weekend_commits = 0;
    let mut after_hours_commits = 0;

    for commit in commits {
        *commits_by_week
            .entry(commit.author_date.format("%Y-W%U").to_string())
            .or_insert(0) += 1;
        if matches!(commit.author_date.weekday(), Weekday::Sat | Weekday::Sun) {
            weekend_commits += 1;
        }
        let hour = commit.author_date.hour();
        if hour < 9 || hour > 17 {
            after_hours_commits += 1;
        }
    }

    let mut cycle_times: Vec<f64> = pull_requests
        .iter()
        .filter_map(|pr| {
            pr.completed_date
                .map(|done| (done - pr.created_date).num_seconds() as f64 / 3600.0)
        })
        .collect();
    cycle_times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (average_cycle, median_cycle) = if cycle_times.is_empty() {
        (None, None)
    } else {
        let average = cycle_times.iter().sum::<f64>() / cycle_times.len() as f64;
        let median = if cycle_times.len() % 2 == 1 {
            cycle_times[cycle_times.len() / 2]
        } else {
            let mid = cycle_times.len() / 2;
            (cycle_times[mid - 1] + cycle_times[mid]) / 2.0
        };
        (Some(average), Some(median))
    };

    TimeAnalytics {
        commits_by_week,
        weekend_commits,
        weekday_commits: commits.len() - weekend_commits,
        weekend_ratio: ratio(weekend_commits, commits.len()),
        after_hours_commits,
        after_hours_ratio: ratio(after_hours_commits, commits.len()),
        average_pr_cycle_time_hours: average_cycle,
        median_pr_cycle_time_hours: median_cycle,
        completed_prs: cycle_times.len(),
    }
}

pub fn analyze_pull_requests(pull_requests: &[PullRequest]) -> PullRequestAnalytics {
    let mut status_distribution = BTreeMap::new();
    for pr in pull_requests {
        *status_distribution.entry(pr.status.clone()).or_insert(0) += 1;
    }

    let total_reviewers: usize = pull_requests.iter().map(|pr| pr.reviewers.len()).sum();

    PullRequestAnalytics {
        total_pull_requests: pull_requests.len(),
        status_distribution,
        average_reviewers_per_pr: ratio(total_reviewers, pull_requests.len()),
        total_reviewers,
    }
}

pub fn analyze_repository_health(
    commits: &[Commit],
    branches: &[Branch],
    pull_requests: &[PullRequest],
) -> RepositoryHealth {
    let now = Utc::now();
    let recent_activity_30_days = commits
        .iter()
        .filter(|c| (now - c.author_date).num_days() <= 30)
        .count();

    let doc_keywords = ["doc", "readme", "documentation"];
    let documentation_commits = commits
        .iter()
        .filter(|c| {
            let lower = c.message.to_lowercase();
            doc_keywords.iter().any(|k| lower.contains(k))
        })
        .count();

    RepositoryHealth {
        recent_activity_30_days,
        documentation_commits,
        documentation_ratio: ratio(documentation_commits, commits.len()),
        total_branches: branches.len(),
        total_pull_requests: pull_requests.len(),
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeCounts, Reviewer};
    use chrono::{TimeZone, Utc};

    fn commit_by(author: &str, parents: usize, when: chrono::DateTime<Utc>) -> Commit {
        Commit {
            commit_id: format!("{author}-{}", when.timestamp()),
            author_name: author.to_string(),
            author_email: format!("{}@example.com", author.to_lowercase()),
            author_date: when,
            committer_name: author.to_string(),
            committer_email: format!("{}@example.com", author.to_lowercase()),
            committer_date: when,
            message: "Update parser".to_string(),
            change_counts: ChangeCounts {
                added: 10,
                edited: 5,
                deleted: 2,
            },
            parents: (0..parents).map(|i| format!("p{i}")).collect(),
            url: String::new(),
        }
    }

    #[test]
    fn commit_analytics_counts_merges_and_totals() {
        let when = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap();
        let commits = vec![
            commit_by("Alice", 1, when),
            commit_by("Alice", 2, when),
            commit_by("Bob", 1, when),
            commit_by("Bob", 2, when),
        ];

        let result = analyze_commits(&commits);
        assert_eq!(result.total_commits, 4);
        assert_eq!(result.merge_commits, 2);
        assert_eq!(result.regular_commits, 2);
        assert!((result.merge_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(result.total_added, 40);
        assert_eq!(result.first_commit_date, Some(when));
    }

    #[test]
    fn commit_analytics_on_empty_input() {
        let result = analyze_commits(&[]);
        assert_eq!(result.total_commits, 0);
        assert_eq!(result.merge_ratio, 0.0);
        assert!(result.first_commit_date.is_none());
    }

    #[test]
    fn bus_factor_reflects_commit_concentration() {
        // Alice carries 8 of 10 commits: one author covers both thresholds.
        let when = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap();
        let mut commits = Vec::new();
        for i in 0..8 {
            commits.push(commit_by("Alice", 1, when + chrono::Duration::minutes(i)));
        }
        commits.push(commit_by("Bob", 1, when));
        commits.push(commit_by("Carol", 1, when));

        let result = analyze_authors(&commits);
        assert_eq!(result.total_authors, 3);
        assert_eq!(result.bus_factor_50_percent, 1);
        assert_eq!(result.bus_factor_80_percent, 1);
        assert_eq!(result.top_contributors_by_commits[0].name, "Alice");
    }

    #[test]
    fn author_stats_track_email_variants() {
        let when = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap();
        let mut a = commit_by("Alice", 1, when);
        let mut b = commit_by("Alice", 1, when + chrono::Duration::hours(1));
        a.author_email = "alice@example.com".to_string();
        b.author_email = "alice@corp.example.com".to_string();

        let result = analyze_authors(&[a, b]);
        let alice = &result.author_statistics["Alice"];
        assert_eq!(alice.commits, 2);
        assert_eq!(alice.email_count, 2);
        assert!(alice.first_commit.unwrap() < alice.last_commit.unwrap());
    }

    #[test]
    fn branch_classification_by_keyword() {
        let branches: Vec<Branch> = ["main", "feature/login", "hotfix/crash", "release/1.2"]
            .iter()
            .map(|name| Branch {
                name: name.to_string(),
                object_id: "o".to_string(),
                creator: None,
                url: String::new(),
                is_default: *name == "main",
            })
            .collect();

        let result = analyze_branches(&branches);
        assert_eq!(result.total_branches, 4);
        assert_eq!(result.feature_branches, 1);
        assert_eq!(result.hotfix_branches, 1);
        assert_eq!(result.release_branches, 1);
        assert_eq!(result.branch_name_patterns["no_prefix"], 1);
        assert_eq!(result.branch_name_patterns["feature"], 1);
    }

    #[test]
    fn time_patterns_split_weekends_and_cycle_times() {
        // 2025-03-08 is a Saturday; 2025-03-10 a Monday.
        let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 22, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let commits = vec![commit_by("Alice", 1, saturday), commit_by("Bob", 1, monday)];

        let created = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let prs = vec![
            PullRequest {
                pull_request_id: 1,
                title: "a".to_string(),
                description: String::new(),
                source_branch: String::new(),
                target_branch: String::new(),
                author: "Bob".to_string(),
                created_date: created,
                closed_date: None,
                completed_date: Some(created + chrono::Duration::hours(12)),
                status: "completed".to_string(),
                merge_status: String::new(),
                reviewers: Vec::new(),
                url: String::new(),
            },
            PullRequest {
                pull_request_id: 2,
                title: "b".to_string(),
                description: String::new(),
                source_branch: String::new(),
                target_branch: String::new(),
                author: "Bob".to_string(),
                created_date: created,
                closed_date: None,
                completed_date: None,
                status: "active".to_string(),
                merge_status: String::new(),
                reviewers: Vec::new(),
                url: String::new(),
            },
        ];

        let result = analyze_time_patterns(&commits, &prs);
        assert_eq!(result.weekend_commits, 1);
        assert_eq!(result.weekday_commits, 1);
        assert_eq!(result.after_hours_commits, 1);
        assert_eq!(result.completed_prs, 1);
        assert_eq!(result.average_pr_cycle_time_hours, Some(12.0));
        assert_eq!(result.median_pr_cycle_time_hours, Some(12.0));
    }

    #[test]
    fn pull_request_distribution_and_reviewers() {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let reviewer = Reviewer {
            name: "Alice".to_string(),
            vote: 10,
            is_required: false,
        };
        let mk = |id: i64, status: &str, reviewers: usize| PullRequest {
            pull_request_id: id,
            title: String::new(),
            description: String::new(),
            source_branch: String::new(),
            target_branch: String::new(),
            author: "Bob".to_string(),
            created_date: created,
            closed_date: None,
            completed_date: None,
            status: status.to_string(),
            merge_status: String::new(),
            reviewers: vec![reviewer.clone(); reviewers],
            url: String::new(),
        };

        let prs = vec![mk(1, "active", 2), mk(2, "completed", 1), mk(3, "active", 0)];
        let result = analyze_pull_requests(&prs);
        assert_eq!(result.total_pull_requests, 3);
        assert_eq!(result.status_distribution["active"], 2);
        assert_eq!(result.total_reviewers, 3);
        assert!((result.average_reviewers_per_pr - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_assembles_all_categories() {
        let repo = Repository {
            id: "r1".to_string(),
            name: "widgets".to_string(),
            project: "Platform".to_string(),
            url: String::new(),
            default_branch: "refs/heads/main".to_string(),
            size: 0,
            is_fork: false,
        };
        let when = Utc::now() - chrono::Duration::days(2);
        let snapshot = analyze(&repo, &[commit_by("Alice", 1, when)], &[], &[]);
        assert_eq!(snapshot.repository_id, "r1");
        assert_eq!(snapshot.commit_analytics.total_commits, 1);
        assert_eq!(snapshot.repository_health.recent_activity_30_days, 1);
        assert!(snapshot.extra.is_null());
    }
}
