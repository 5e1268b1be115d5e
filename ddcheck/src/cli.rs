//! Operator command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use live_probe::{Channel, LiveDescriptor};

use crate::config::CONFIG_PATH_ENV;
use crate::domain::{GroupId, SubscribeOutcome, SubscriptionBook, UnsubscribeOutcome, UserId};
use crate::notification::format_time_left;
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "ddcheck",
    version,
    about = "VTuber follow-list checks and live-stream notifications"
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. `ddcheck=debug`
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Run)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the notifier service (default)
    Run,
    /// Subscribe a group to a channel
    Subscribe {
        platform: Platform,
        nickname: String,
        /// Bilibili uid or YouTube handle
        id: String,
        #[arg(long)]
        group: GroupId,
    },
    /// Remove a group from a channel's subscribers
    Unsubscribe {
        platform: Platform,
        id: String,
        #[arg(long)]
        group: GroupId,
    },
    /// Mention `user` in every notification sent to `group`
    Bind { group: GroupId, user: UserId },
    /// Stop mentioning `user` in `group`
    Unbind { group: GroupId, user: UserId },
    /// List upcoming YouTube streams of subscribed channels
    WhenLive,
    /// Report how many of a user's follows are VTubers
    Check {
        /// Alias, uid or exact user name
        query: String,
    },
    /// Manage uid aliases
    Alias {
        #[command(subcommand)]
        command: AliasCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AliasCommand {
    Set { nickname: String, uid: u64 },
    Rm { nickname: String },
    List,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Bilibili,
    Youtube,
}

impl Platform {
    pub fn channel(self, id: &str) -> Result<Channel> {
        match self {
            Self::Bilibili => id
                .trim()
                .parse()
                .map(Channel::Bilibili)
                .map_err(|_| Error::validation(format!("invalid bilibili uid: {id}"))),
            Self::Youtube if id.trim().trim_start_matches('@').is_empty() => {
                Err(Error::validation("empty youtube handle"))
            }
            Self::Youtube => Ok(Channel::youtube(id.trim())),
        }
    }
}

/// Reply to a successful subscribe, with the upcoming stream if one is known.
pub fn subscribe_reply(
    outcome: SubscribeOutcome,
    nickname: &str,
    live: Option<&LiveDescriptor>,
    now: i64,
) -> String {
    let lead = match outcome {
        SubscribeOutcome::AlreadySubscribed => format!("{nickname}已经在关注了喵"),
        SubscribeOutcome::Created | SubscribeOutcome::GroupAdded => {
            format!("关注{nickname}成功喵~")
        }
    };
    match live {
        Some(live) => format!("{lead}，{}", format_time_left(live.release_time, now)),
        None => format!("{lead}，{nickname}还没开始播噢，别担心，时间到了我会提醒你的"),
    }
}

/// Execute a command that only touches the subscription book.
///
/// Returns `None` for commands that need the network.
pub fn execute_book_command(book: &SubscriptionBook, command: &Command) -> Result<Option<String>> {
    let reply = match command {
        Command::Unsubscribe {
            platform,
            id,
            group,
        } => match book.unsubscribe(&platform.channel(id)?, *group)? {
            UnsubscribeOutcome::GroupRemoved | UnsubscribeOutcome::SubscriptionRemoved => {
                "删除成功".to_string()
            }
            UnsubscribeOutcome::NotSubscribed => format!("群{group}没有关注{id}"),
        },
        Command::Bind { group, user } => {
            if book.bind(*group, *user)? {
                format!("{user} 绑定成功，回复TD不退订")
            } else {
                format!("{user} 已经绑定了")
            }
        }
        Command::Unbind { group, user } => {
            if book.unbind(*group, *user)? {
                format!("{user} 解绑成功")
            } else {
                format!("{user} 并没有绑定")
            }
        }
        Command::Alias { command } => match command {
            AliasCommand::Set { nickname, uid } => {
                book.set_alias(nickname.as_str(), *uid)?;
                "更新成功".to_string()
            }
            AliasCommand::Rm { nickname } => {
                if book.remove_alias(nickname)? {
                    "删除成功".to_string()
                } else {
                    return Err(Error::not_found("alias", nickname.as_str()));
                }
            }
            AliasCommand::List => book
                .snapshot()
                .aliases
                .iter()
                .map(|a| format!("{} -> {}", a.nickname, a.uid))
                .collect::<Vec<_>>()
                .join("\n"),
        },
        Command::Run | Command::Subscribe { .. } | Command::WhenLive | Command::Check { .. } => {
            return Ok(None);
        }
    };
    Ok(Some(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookSnapshot;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ddcheck").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = parse(&[]);
        assert_eq!(cli.command(), &Command::Run);
        assert!(cli.log_filter.is_none());
    }

    #[test]
    fn test_parse_subscribe() {
        let cli = parse(&[
            "--log-filter",
            "ddcheck=debug",
            "subscribe",
            "youtube",
            "玛丽亚",
            "MariaMari0nette",
            "--group",
            "123",
        ]);
        assert_eq!(cli.log_filter.as_deref(), Some("ddcheck=debug"));
        let Command::Subscribe {
            platform,
            nickname,
            id,
            group,
        } = cli.command()
        else {
            panic!("expected subscribe");
        };
        assert_eq!(*platform, Platform::Youtube);
        assert_eq!(nickname, "玛丽亚");
        assert_eq!(
            platform.channel(id).unwrap(),
            Channel::Youtube("@MariaMari0nette".into())
        );
        assert_eq!(*group, 123);
    }

    #[test]
    fn test_platform_channel_validation() {
        assert_eq!(Platform::Bilibili.channel("42").unwrap(), Channel::Bilibili(42));
        assert!(Platform::Bilibili.channel("abc").is_err());
        assert!(Platform::Youtube.channel("@").is_err());
    }

    #[test]
    fn test_subscribe_reply() {
        let live = LiveDescriptor::new(1_000 + 3_600, "https://live.bilibili.com/1");
        assert_eq!(
            subscribe_reply(SubscribeOutcome::Created, "A", Some(&live), 1_000),
            "关注A成功喵~，还有1小时配信"
        );
        assert_eq!(
            subscribe_reply(SubscribeOutcome::AlreadySubscribed, "A", None, 0),
            "A已经在关注了喵，A还没开始播噢，别担心，时间到了我会提醒你的"
        );
    }

    #[test]
    fn test_book_commands() {
        let book = SubscriptionBook::in_memory(BookSnapshot::default());

        let bind = parse(&["bind", "10", "777"]);
        assert_eq!(
            execute_book_command(&book, bind.command()).unwrap().unwrap(),
            "777 绑定成功，回复TD不退订"
        );
        assert_eq!(
            execute_book_command(&book, bind.command()).unwrap().unwrap(),
            "777 已经绑定了"
        );

        let set = parse(&["alias", "set", "小号", "100"]);
        execute_book_command(&book, set.command()).unwrap();
        let list = parse(&["alias", "list"]);
        assert_eq!(
            execute_book_command(&book, list.command()).unwrap().unwrap(),
            "小号 -> 100"
        );

        let rm = parse(&["alias", "rm", "大号"]);
        assert!(matches!(
            execute_book_command(&book, rm.command()),
            Err(Error::NotFound { .. })
        ));

        let unsub = parse(&["unsubscribe", "bilibili", "42", "--group", "10"]);
        assert_eq!(
            execute_book_command(&book, unsub.command()).unwrap().unwrap(),
            "群10没有关注42"
        );

        assert!(
            execute_book_command(&book, &Command::WhenLive)
                .unwrap()
                .is_none()
        );
    }
}
