/*!
Ruche Kernel - Noyau de supervision pour un réseau de capteurs Zigbee

Trois responsabilités coeur, toutes adossées au même problème : tirer une
sémantique synchrone d'un transport publish/subscribe asynchrone et broadcast.

- Registre des périphériques : vue cohérente et interrogeable du parc depuis
  le flux de messages du bridge
- Échange corrélé : requête/réponse bornée dans le temps sur un topic partagé
  sans identifiant de corrélation
- Moteur d'alertes : classification par bandes de sévérité et notifications
  sous cooldown par sujet
*/

pub mod alerts;
pub mod config;
pub mod confirm;
pub mod exchange;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod notify;
pub mod registry;
pub mod transport;
